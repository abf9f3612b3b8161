//! Executes one parsed command over an open connection.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::Write;
use std::rc::Rc;

use ctdb_client::Connection;
use ctdb_protocol::CURRENT_NODE;
use tracing::debug;

use crate::cli::Command;
use crate::errors::AppError;

type Inbox = Rc<RefCell<VecDeque<(u64, Vec<u8>)>>>;

pub(crate) fn execute<W: Write>(
    command: &Command,
    conn: &mut Connection,
    stdout: &mut W,
) -> Result<(), AppError> {
    match command {
        Command::Pnn => {
            let pnn = conn
                .getpnn(CURRENT_NODE)
                .map_err(AppError::request("getpnn"))?;
            writeln!(stdout, "{pnn}").map_err(AppError::Output)
        }
        Command::Ips { node } => {
            let ips = conn
                .getpublicips(node.unwrap_or(CURRENT_NODE))
                .map_err(AppError::request("getpublicips"))?;
            for ip in ips {
                writeln!(stdout, "{} {}", ip.addr.ip(), ip.pnn).map_err(AppError::Output)?;
            }
            Ok(())
        }
        Command::Listen { srvid, count } => listen(conn, *srvid, *count, stdout),
        Command::Send { pnn, srvid, text } => {
            conn.send_message(*pnn, *srvid, text.as_bytes())?;
            conn.run_until(|client| client.outstanding() == 0)
                .map_err(AppError::request("send"))?;
            debug!(pnn, srvid, "message written");
            Ok(())
        }
    }
}

fn listen<W: Write>(
    conn: &mut Connection,
    srvid: u64,
    count: Option<usize>,
    stdout: &mut W,
) -> Result<(), AppError> {
    let inbox = Inbox::default();
    let sink = Rc::clone(&inbox);
    conn.set_message_handler(srvid, move |_, channel, data| {
        sink.borrow_mut().push_back((channel, data.to_vec()));
    })
    .map_err(AppError::request("set_message_handler"))?;
    debug!(srvid, "listening");

    let mut printed = 0usize;
    while count.is_none_or(|limit| printed < limit) {
        conn.run_until(|_| !inbox.borrow().is_empty())
            .map_err(AppError::request("listen"))?;
        let batch: Vec<_> = inbox.borrow_mut().drain(..).collect();
        let remaining = count.map_or(batch.len(), |limit| limit.saturating_sub(printed));
        for (channel, data) in batch.into_iter().take(remaining) {
            writeln!(stdout, "{channel}: {}", String::from_utf8_lossy(&data))
                .map_err(AppError::Output)?;
            printed += 1;
        }
        stdout.flush().map_err(AppError::Output)?;
    }
    Ok(())
}

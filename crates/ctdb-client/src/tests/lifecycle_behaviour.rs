//! Behavioural tests for request correlation, cancellation and transport
//! failure.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::io::Read;
use std::rc::Rc;

use ctdb_protocol::{CURRENT_NODE, ControlOpcode, encode_u32_payload};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use super::support::{FakeDaemon, LOCAL_PNN, RecordingLogger, connected, control_reply_frame};
use crate::request::Membership;
use crate::{Connection, Events, RequestHandle, ServiceError, Severity};

type Completions = Rc<RefCell<Vec<(String, Vec<u8>)>>>;

struct LifecycleWorld {
    logger: RecordingLogger,
    conn: Option<Connection>,
    daemon: Option<FakeDaemon>,
    handles: HashMap<String, RequestHandle>,
    reqids: HashMap<String, u32>,
    seen_reqids: Vec<u32>,
    completions: Completions,
    counts_per_chunk: Vec<usize>,
    service_errors: Vec<ServiceError>,
}

impl LifecycleWorld {
    fn new() -> Self {
        Self {
            logger: RecordingLogger::default(),
            conn: None,
            daemon: None,
            handles: HashMap::new(),
            reqids: HashMap::new(),
            seen_reqids: Vec::new(),
            completions: Rc::new(RefCell::new(Vec::new())),
            counts_per_chunk: Vec::new(),
            service_errors: Vec::new(),
        }
    }

    fn conn(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("client connected")
    }

    fn daemon(&mut self) -> &mut FakeDaemon {
        self.daemon.as_mut().expect("daemon running")
    }

    fn pump(&mut self) {
        if let Err(error) = self.conn().service(Events::READ_WRITE) {
            self.service_errors.push(error);
        }
    }

    fn send(&mut self, label: &str) {
        let completions = Rc::clone(&self.completions);
        let owned = label.to_owned();
        let handle = self
            .conn()
            .control_send(
                CURRENT_NODE,
                ControlOpcode::GetDbPath,
                0,
                &encode_u32_payload(7),
                move |conn, req| {
                    let body = conn
                        .control_reply(&req, ControlOpcode::GetDbPath)
                        .map(|reply| reply.data.to_vec())
                        .expect("control reply");
                    completions.borrow_mut().push((owned, body));
                    conn.free_request(req);
                },
            )
            .expect("send control");
        self.handles.insert(label.to_owned(), handle);
    }

    fn collect_reqids(&mut self, labels: &[&str]) {
        self.pump();
        for label in labels {
            let reqid = self.daemon().read_frame().reqid();
            self.seen_reqids.push(reqid);
            self.reqids.insert((*label).to_owned(), reqid);
        }
    }

    fn answer(&mut self, label: &str) {
        let reqid = self.reqids[label];
        self.daemon().reply_control(reqid, 0, label.as_bytes());
    }

    fn completed(&self, label: &str) -> Vec<Vec<u8>> {
        self.completions
            .borrow()
            .iter()
            .filter(|(done, _)| done == label)
            .map(|(_, body)| body.clone())
            .collect()
    }
}

#[fixture]
fn world() -> RefCell<LifecycleWorld> {
    RefCell::new(LifecycleWorld::new())
}

#[given("a client connected to a scripted daemon")]
fn given_connected(world: &RefCell<LifecycleWorld>) {
    let mut state = world.borrow_mut();
    let (conn, daemon) = connected(&state.logger);
    state.conn = Some(conn);
    state.daemon = Some(daemon);
    state.pump();
    state.daemon().answer_bootstrap();
    state.pump();
    assert_eq!(state.conn().pnn(), Some(LOCAL_PNN));
}

#[given("a freshly connected client")]
fn given_fresh(world: &RefCell<LifecycleWorld>) {
    let mut state = world.borrow_mut();
    let (conn, daemon) = connected(&state.logger);
    state.conn = Some(conn);
    state.daemon = Some(daemon);
}

#[when("the client sends control requests \"{first}\" and \"{second}\"")]
fn when_sends_two(world: &RefCell<LifecycleWorld>, first: String, second: String) {
    let mut state = world.borrow_mut();
    state.send(&first);
    state.send(&second);
    state.collect_reqids(&[&first, &second]);
}

#[when("the client sends control request \"{label}\"")]
fn when_sends_one(world: &RefCell<LifecycleWorld>, label: String) {
    let mut state = world.borrow_mut();
    state.send(&label);
    state.collect_reqids(&[&label]);
}

#[when("the client sends {count} control requests without replies")]
fn when_sends_many(world: &RefCell<LifecycleWorld>, count: usize) {
    let mut state = world.borrow_mut();
    let labels: Vec<String> = (0..count).map(|index| format!("r{index}")).collect();
    for label in &labels {
        state.send(label);
    }
    let refs: Vec<&str> = labels.iter().map(String::as_str).collect();
    state.collect_reqids(&refs);
}

#[when("the daemon answers \"{first}\" then \"{second}\"")]
fn when_answers_two(world: &RefCell<LifecycleWorld>, first: String, second: String) {
    let mut state = world.borrow_mut();
    state.answer(&first);
    state.answer(&second);
    state.pump();
}

#[when("the daemon answers request \"{label}\"")]
fn when_answers_one(world: &RefCell<LifecycleWorld>, label: String) {
    let mut state = world.borrow_mut();
    state.answer(&label);
    state.pump();
}

#[when("the daemon answers \"{label}\" in chunks of 1, 5 and the rest")]
fn when_answers_in_chunks(world: &RefCell<LifecycleWorld>, label: String) {
    let mut state = world.borrow_mut();
    let reqid = state.reqids[&label];
    let frame = control_reply_frame(reqid, 0, label.as_bytes());
    let (first, rest) = frame.split_at(1);
    let (second, third) = rest.split_at(5);
    for chunk in [first, second, third] {
        state.daemon().write_raw(chunk);
        state.pump();
        let done = state.completed(&label).len();
        state.counts_per_chunk.push(done);
    }
}

#[when("the client cancels \"{label}\"")]
fn when_cancels(world: &RefCell<LifecycleWorld>, label: String) {
    let mut state = world.borrow_mut();
    let handle = state.handles[&label];
    state.conn().cancel(handle);
}

#[when("the client frees \"{label}\" while it awaits its reply")]
fn when_frees_queued(world: &RefCell<LifecycleWorld>, label: String) {
    let mut state = world.borrow_mut();
    let reqid = state.reqids[&label];
    let conn = state.conn();
    let mut request = conn.registry.take_done(reqid).expect("awaiting reply");
    // Pretend the caller still holds a reference the done queue owns.
    request.membership = Membership::Done;
    conn.free_request(request);
}

#[when("the client disconnects")]
fn when_disconnects(world: &RefCell<LifecycleWorld>) {
    let conn = world.borrow_mut().conn.take().expect("client connected");
    conn.disconnect();
}

#[when("the daemon closes the connection")]
fn when_daemon_closes(world: &RefCell<LifecycleWorld>) {
    let daemon = world.borrow_mut().daemon.take().expect("daemon running");
    daemon.close();
}

#[when("the daemon sends a reply for correlation id {reqid}")]
fn when_stray_reply(world: &RefCell<LifecycleWorld>, reqid: u32) {
    let mut state = world.borrow_mut();
    state.daemon().reply_control(reqid, 0, b"stray");
    state.pump();
}

#[then("request \"{label}\" completed once with body \"{body}\"")]
fn then_completed_once(world: &RefCell<LifecycleWorld>, label: String, body: String) {
    assert_eq!(world.borrow().completed(&label), vec![body.into_bytes()]);
}

#[then("request \"{label}\" never completed")]
fn then_never_completed(world: &RefCell<LifecycleWorld>, label: String) {
    assert!(world.borrow().completed(&label).is_empty());
}

#[then("request \"{label}\" completed only after the final chunk")]
fn then_completed_after_last_chunk(world: &RefCell<LifecycleWorld>, label: String) {
    let state = world.borrow();
    assert_eq!(state.counts_per_chunk, vec![0, 0, 1]);
    assert_eq!(state.completed(&label), vec![label.into_bytes()]);
}

#[then("no requests are outstanding")]
fn then_nothing_outstanding(world: &RefCell<LifecycleWorld>) {
    assert_eq!(world.borrow_mut().conn().outstanding(), 0);
}

#[then("{count} request is outstanding")]
fn then_outstanding(world: &RefCell<LifecycleWorld>, count: usize) {
    assert_eq!(world.borrow_mut().conn().outstanding(), count);
}

#[then("an alert was logged")]
fn then_alert_logged(world: &RefCell<LifecycleWorld>) {
    assert_eq!(world.borrow().logger.count(Severity::Alert), 1);
}

#[then("a warning mentions \"{needle}\"")]
fn then_warning(world: &RefCell<LifecycleWorld>, needle: String) {
    assert!(world.borrow().logger.contains(Severity::Warning, &needle));
}

#[then("the daemon saw {count} distinct correlation ids")]
fn then_distinct_reqids(world: &RefCell<LifecycleWorld>, count: usize) {
    let mut state = world.borrow_mut();
    let distinct: BTreeSet<u32> = state.seen_reqids.iter().copied().collect();
    assert_eq!(distinct.len(), count);
    let queued: BTreeSet<u32> = state.conn().registry.iter().map(|req| req.reqid).collect();
    assert_eq!(queued.len(), state.conn().outstanding());
}

#[then("the daemon sees the connection close")]
fn then_daemon_sees_close(world: &RefCell<LifecycleWorld>) {
    let mut state = world.borrow_mut();
    let mut buffer = Vec::new();
    let read = state
        .daemon()
        .stream_mut()
        .read_to_end(&mut buffer)
        .expect("read until close");
    // The bootstrap request was never serviced, so nothing was written.
    assert_eq!(read, 0);
}

#[then("the local node number was never recorded")]
fn then_pnn_unrecorded(world: &RefCell<LifecycleWorld>) {
    assert!(
        !world
            .borrow()
            .logger
            .contains(Severity::Debug, "local node is pnn")
    );
}

#[then("servicing reports that the daemon closed the connection")]
fn then_closed(world: &RefCell<LifecycleWorld>) {
    let mut state = world.borrow_mut();
    state.pump();
    assert!(matches!(
        state.service_errors.last(),
        Some(ServiceError::Closed)
    ));
    assert!(state.conn().is_broken());
}

#[then("servicing again reports a broken connection")]
fn then_broken(world: &RefCell<LifecycleWorld>) {
    let mut state = world.borrow_mut();
    let before = state.conn().outstanding();
    state.pump();
    assert!(matches!(
        state.service_errors.last(),
        Some(ServiceError::Broken)
    ));
    assert_eq!(state.conn().outstanding(), before);
}

#[scenario(
    path = "tests/features/request_lifecycle.feature",
    name = "Replies arriving out of order reach the right callers"
)]
fn out_of_order_replies(world: RefCell<LifecycleWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/request_lifecycle.feature",
    name = "A cancelled request is freed without notifying its caller"
)]
fn cancelled_request(world: RefCell<LifecycleWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/request_lifecycle.feature",
    name = "Freeing a queued request cancels it instead"
)]
fn free_of_queued_request(world: RefCell<LifecycleWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/request_lifecycle.feature",
    name = "Correlation ids are unique while requests are queued"
)]
fn unique_reqids(world: RefCell<LifecycleWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/request_lifecycle.feature",
    name = "Disconnecting before the bootstrap reply is harmless"
)]
fn disconnect_before_bootstrap(world: RefCell<LifecycleWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/request_lifecycle.feature",
    name = "A reply split across three reads completes on the last one"
)]
fn split_reply(world: RefCell<LifecycleWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/request_lifecycle.feature",
    name = "A closed connection stays broken"
)]
fn sticky_broken(world: RefCell<LifecycleWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/request_lifecycle.feature",
    name = "A reply nobody waits for is logged and dropped"
)]
fn stray_reply(world: RefCell<LifecycleWorld>) {
    drop(world);
}

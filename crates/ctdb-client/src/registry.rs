//! Owner of every queued request.
//!
//! Requests live in exactly one of two deques: `outgoing`, written in FIFO
//! order, and `done`, awaiting a reply. A request taken out of either is
//! detached and belongs to whoever took it.

use std::collections::VecDeque;

use crate::request::{Membership, Request, RequestHandle};

#[derive(Debug, Default)]
pub(crate) struct Registry {
    outgoing: VecDeque<Request>,
    done: VecDeque<Request>,
    next_reqid: u32,
    next_handle: u64,
}

impl Registry {
    /// Picks a correlation id not carried by any queued request.
    ///
    /// A linear scan from a rolling hint; outstanding counts are small.
    pub(crate) fn allocate_reqid(&mut self) -> u32 {
        let mut candidate = self.next_reqid;
        while self.contains_reqid(candidate) {
            candidate = candidate.wrapping_add(1);
        }
        self.next_reqid = candidate.wrapping_add(1);
        candidate
    }

    pub(crate) const fn allocate_handle(&mut self) -> RequestHandle {
        let handle = RequestHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }

    pub(crate) fn contains_reqid(&self, reqid: u32) -> bool {
        self.iter().any(|request| request.reqid == reqid)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Request> {
        self.outgoing.iter().chain(self.done.iter())
    }

    pub(crate) fn len(&self) -> usize {
        self.outgoing.len() + self.done.len()
    }

    pub(crate) fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    /// Appends to the write queue.
    pub(crate) fn push_outgoing(&mut self, mut request: Request) {
        request.membership = Membership::Outgoing;
        self.outgoing.push_back(request);
    }

    pub(crate) fn front_outgoing_mut(&mut self) -> Option<&mut Request> {
        self.outgoing.front_mut()
    }

    pub(crate) fn pop_outgoing(&mut self) -> Option<Request> {
        let mut request = self.outgoing.pop_front()?;
        request.membership = Membership::Detached;
        Some(request)
    }

    /// Parks a fully written request; the newest sits at the front.
    pub(crate) fn push_done(&mut self, mut request: Request) {
        request.membership = Membership::Done;
        self.done.push_front(request);
    }

    /// Detaches the request awaiting `reqid`, if any.
    pub(crate) fn take_done(&mut self, reqid: u32) -> Option<Request> {
        let index = self.done.iter().position(|request| request.reqid == reqid)?;
        let mut request = self.done.remove(index)?;
        request.membership = Membership::Detached;
        Some(request)
    }

    pub(crate) fn find_mut(&mut self, handle: RequestHandle) -> Option<&mut Request> {
        self.outgoing
            .iter_mut()
            .chain(self.done.iter_mut())
            .find(|request| request.handle == handle)
    }

    /// Puts a request back under the queue its membership names.
    pub(crate) fn restore(&mut self, request: Request) {
        match request.membership {
            Membership::Done => self.push_done(request),
            Membership::Outgoing | Membership::Detached => self.push_outgoing(request),
        }
    }

    /// Detaches every queued request, outgoing first.
    pub(crate) fn drain(&mut self) -> Vec<Request> {
        self.outgoing
            .drain(..)
            .chain(self.done.drain(..))
            .map(|mut request| {
                request.membership = Membership::Detached;
                request
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Completion, RequestKind};
    use rstest::{fixture, rstest};

    fn request(registry: &mut Registry) -> Request {
        let reqid = registry.allocate_reqid();
        let handle = registry.allocate_handle();
        Request::new(
            handle,
            reqid,
            RequestKind::Message,
            vec![0; 8],
            Completion::Discard,
            None,
        )
    }

    #[fixture]
    fn registry() -> Registry {
        Registry::default()
    }

    #[rstest]
    fn reqids_skip_queued_values(mut registry: Registry) {
        let first = request(&mut registry);
        registry.push_outgoing(first);
        registry.next_reqid = 0;
        assert_eq!(registry.allocate_reqid(), 1);
    }

    #[rstest]
    fn reqids_are_recycled_once_released(mut registry: Registry) {
        let first = request(&mut registry);
        let reqid = first.reqid;
        registry.push_outgoing(first);
        drop(registry.pop_outgoing());
        registry.next_reqid = reqid;
        assert_eq!(registry.allocate_reqid(), reqid);
    }

    #[rstest]
    fn reqid_hint_wraps(mut registry: Registry) {
        registry.next_reqid = u32::MAX;
        assert_eq!(registry.allocate_reqid(), u32::MAX);
        assert_eq!(registry.allocate_reqid(), 0);
    }

    #[rstest]
    fn done_queue_is_scanned_by_reqid(mut registry: Registry) {
        for _ in 0..3 {
            let req = request(&mut registry);
            registry.push_done(req);
        }
        let taken = registry.take_done(1).expect("reqid 1 parked");
        assert_eq!(taken.reqid, 1);
        assert_eq!(taken.membership, Membership::Detached);
        assert!(registry.take_done(1).is_none());
        assert_eq!(registry.len(), 2);
    }

    #[rstest]
    fn drain_detaches_everything(mut registry: Registry) {
        let a = request(&mut registry);
        let b = request(&mut registry);
        registry.push_outgoing(a);
        registry.push_done(b);
        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert!(drained.iter().all(|r| r.membership == Membership::Detached));
        assert_eq!(registry.len(), 0);
    }
}

//! Named rendezvous points pairing senders and receivers.

use std::any::Any;
use std::collections::{BTreeMap, VecDeque};

use crate::activity::{ActivityId, ActivityKind, ActivityState, CommData};
use crate::actor::ActorId;
use crate::engine::Kernel;
use crate::error::ActivityError;
use crate::log_debug;
use crate::platform::HostId;
use crate::resource::ActionId;

/// FIFO queues of pending halves. At most one of `send_queue`/`recv_queue` is non-empty
/// unless a permanent receiver drains sends eagerly into `in_flight`/`done`.
#[derive(Default)]
pub(crate) struct Mailbox {
    pub send_queue: VecDeque<ActivityId>,
    pub recv_queue: VecDeque<ActivityId>,
    /// Comms started eagerly towards the permanent receiver, still transferring.
    pub in_flight: VecDeque<ActivityId>,
    /// Buffered comms that completed before anyone asked for them.
    pub done: VecDeque<ActivityId>,
    pub permanent_receiver: Option<ActorId>,
}

#[derive(Default)]
pub(crate) struct Mailboxes {
    map: BTreeMap<String, Mailbox>,
}

impl Mailboxes {
    pub fn get_or_create(&mut self, name: &str) -> &mut Mailbox {
        self.map.entry(name.to_string()).or_default()
    }
}

impl Kernel {
    /// Posts a send. If a compatible receive is already queued the two halves merge
    /// into one comm which is handed to the network model right away; with a permanent
    /// receiver the comm starts eagerly; otherwise the send is enqueued.
    pub(crate) fn comm_put(
        &mut self,
        mailbox: &str,
        src_actor: ActorId,
        payload: Box<dyn Any>,
        size: f64,
        rate: f64,
    ) -> ActivityId {
        let src_host = self.actors.get(src_actor).host;

        let matched = self.mailboxes.get_or_create(mailbox).recv_queue.pop_front();
        match matched {
            Some(id) => {
                log_debug!(self, "send on '{}' matches pending receive {}", mailbox, id);
                if let ActivityKind::Comm(comm) = &mut self.activities.get_mut(id).kind {
                    comm.src_actor = Some(src_actor);
                    comm.src_host = Some(src_host);
                    comm.size = size;
                    comm.rate = if comm.rate > 0.0 { f64::min(comm.rate, rate) } else { rate };
                    comm.payload = Some(payload);
                }
                self.activities.get_mut(id).state = ActivityState::Ready;
                self.start_activity(id);
                id
            }
            None => {
                // With a permanent receiver the send starts eagerly and completes into
                // the mailbox buffer; otherwise it queues up waiting for a receive.
                let permanent_receiver = self.mailboxes.get_or_create(mailbox).permanent_receiver;
                let id = self.activities.insert(ActivityKind::Comm(CommData {
                    mailbox: Some(mailbox.to_string()),
                    src_actor: Some(src_actor),
                    dst_actor: permanent_receiver,
                    src_host: Some(src_host),
                    dst_host: permanent_receiver.map(|receiver| self.actors.get(receiver).host),
                    size,
                    rate,
                    payload: Some(payload),
                    detached: false,
                }));
                match permanent_receiver {
                    Some(_) => {
                        log_debug!(self, "send {} drains eagerly on '{}'", id, mailbox);
                        self.mailboxes.get_or_create(mailbox).in_flight.push_back(id);
                        self.start_activity(id);
                    }
                    None => {
                        log_debug!(self, "send {} queued on '{}'", id, mailbox);
                        self.mailboxes.get_or_create(mailbox).send_queue.push_back(id);
                    }
                }
                id
            }
        }
    }

    /// Posts a receive, symmetrically to [Kernel::comm_put]. On a permanent-receiver
    /// mailbox the oldest buffered or in-flight comm is claimed instead.
    pub(crate) fn comm_get(&mut self, mailbox: &str, dst_actor: ActorId) -> ActivityId {
        let dst_host = self.actors.get(dst_actor).host;

        if let Some(id) = self.mailboxes.get_or_create(mailbox).done.pop_front() {
            log_debug!(self, "receive on '{}' claims buffered {}", mailbox, id);
            return id;
        }
        if let Some(id) = self.mailboxes.get_or_create(mailbox).in_flight.pop_front() {
            log_debug!(self, "receive on '{}' claims in-flight {}", mailbox, id);
            return id;
        }

        let matched = self.mailboxes.get_or_create(mailbox).send_queue.pop_front();
        match matched {
            Some(id) => {
                log_debug!(self, "receive on '{}' matches pending send {}", mailbox, id);
                if let ActivityKind::Comm(comm) = &mut self.activities.get_mut(id).kind {
                    comm.dst_actor = Some(dst_actor);
                    comm.dst_host = Some(dst_host);
                }
                self.activities.get_mut(id).state = ActivityState::Ready;
                self.start_activity(id);
                id
            }
            None => {
                let id = self.activities.insert(ActivityKind::Comm(CommData {
                    mailbox: Some(mailbox.to_string()),
                    src_actor: None,
                    dst_actor: Some(dst_actor),
                    src_host: None,
                    dst_host: Some(dst_host),
                    size: 0.0,
                    rate: 0.0,
                    payload: None,
                    detached: false,
                }));
                log_debug!(self, "receive {} queued on '{}'", id, mailbox);
                self.mailboxes.get_or_create(mailbox).recv_queue.push_back(id);
                id
            }
        }
    }

    /// Host-to-host bypass: a transfer with explicit endpoints and no rendezvous.
    pub(crate) fn comm_sendto(&mut self, from: HostId, to: HostId, size: f64) -> ActivityId {
        let id = self.activities.insert(ActivityKind::Comm(CommData {
            mailbox: None,
            src_actor: None,
            dst_actor: None,
            src_host: Some(from),
            dst_host: Some(to),
            size,
            rate: 0.0,
            payload: None,
            detached: false,
        }));
        self.start_activity(id);
        id
    }

    /// Hands a fully-bound comm to the network model.
    pub(crate) fn start_comm_action(&mut self, id: ActivityId) -> Result<ActionId, ActivityError> {
        let (src, dst, size, rate) = match &self.activities.get(id).kind {
            ActivityKind::Comm(comm) => {
                let src = comm.src_host.expect("starting a comm without a sender");
                let dst = comm.dst_host.expect("starting a comm without a receiver");
                (src, dst, comm.size, comm.rate)
            }
            _ => unreachable!("start_comm_action on a non-comm activity"),
        };
        self.network.comm_start(&mut self.res, id, src, dst, size, rate, self.clock)
    }

    pub(crate) fn set_mailbox_receiver(&mut self, mailbox: &str, actor: ActorId) {
        self.mailboxes.get_or_create(mailbox).permanent_receiver = Some(actor);
    }

    pub(crate) fn comm_detach(&mut self, id: ActivityId) {
        if let ActivityKind::Comm(comm) = &mut self.activities.get_mut(id).kind {
            comm.detached = true;
        }
    }

    /// Removes payload ownership from a completed receive.
    pub(crate) fn take_comm_payload(&mut self, id: ActivityId) -> Option<Box<dyn Any>> {
        match &mut self.activities.get_mut(id).kind {
            ActivityKind::Comm(comm) => comm.payload.take(),
            _ => None,
        }
    }

    /// Drops a canceled or timed-out comm from whatever mailbox queue still holds it.
    pub(crate) fn withdraw_from_mailbox(&mut self, id: ActivityId) {
        let mailbox = match &self.activities.get(id).kind {
            ActivityKind::Comm(comm) => comm.mailbox.clone(),
            _ => None,
        };
        if let Some(name) = mailbox {
            let mailbox = self.mailboxes.get_or_create(&name);
            mailbox.send_queue.retain(|&c| c != id);
            mailbox.recv_queue.retain(|&c| c != id);
            mailbox.in_flight.retain(|&c| c != id);
        }
    }

    /// Post-settlement bookkeeping for comms: buffer permanent-receiver completions,
    /// drop detached payload-free sends.
    pub(crate) fn on_comm_settled(&mut self, id: ActivityId) {
        let (mailbox, detached, done) = match &self.activities.get(id).kind {
            ActivityKind::Comm(comm) => (
                comm.mailbox.clone(),
                comm.detached,
                self.activities.get(id).state == ActivityState::Done,
            ),
            _ => return,
        };
        if let Some(name) = mailbox {
            let handover = {
                let mb = self.mailboxes.get_or_create(&name);
                if mb.in_flight.iter().any(|&c| c == id) {
                    mb.in_flight.retain(|&c| c != id);
                    if done {
                        // Hand the payload straight to a queued receive, or buffer it.
                        match mb.recv_queue.pop_front() {
                            Some(recv) => Some(recv),
                            None => {
                                mb.done.push_back(id);
                                None
                            }
                        }
                    } else {
                        None
                    }
                } else {
                    None
                }
            };
            if let Some(recv) = handover {
                let payload = self.take_comm_payload(id);
                if let ActivityKind::Comm(comm) = &mut self.activities.get_mut(recv).kind {
                    comm.payload = payload;
                }
                self.finish_activity(recv);
            }
        }
        if detached && !done {
            // The receiver never showed up; free the payload now.
            if let ActivityKind::Comm(comm) = &mut self.activities.get_mut(id).kind {
                comm.payload = None;
            }
        }
    }
}

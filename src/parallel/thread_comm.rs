// In-process communicator: one thread per rank, shared mailboxes.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Barrier, Condvar, Mutex};
use std::time::{Duration, Instant};

use super::{CommError, CommTag, Communicator, Wait};

type MailKey = (usize, usize, CommTag);

struct Mailbox {
    queues: Mutex<HashMap<MailKey, VecDeque<Vec<u8>>>>,
    arrived: Condvar,
    barrier: Barrier,
}

/// Communicator for ranks that live as threads of one process.
///
/// Sends are eager: the payload is queued for the destination when posted, so
/// send handles complete immediately. Receives block in `wait` until a
/// matching message arrives or the timeout expires.
#[derive(Clone)]
pub struct ThreadComm {
    rank: usize,
    size: usize,
    timeout: Duration,
    mailbox: Arc<Mailbox>,
}

impl ThreadComm {
    /// Build `size` connected communicators, one per rank.
    pub fn universe(size: usize) -> Vec<ThreadComm> {
        let mailbox = Arc::new(Mailbox {
            queues: Mutex::new(HashMap::new()),
            arrived: Condvar::new(),
            barrier: Barrier::new(size.max(1)),
        });
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                size,
                timeout: Duration::from_secs(30),
                mailbox: Arc::clone(&mailbox),
            })
            .collect()
    }

    /// Upper bound on how long a receive waits for its message.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn check_peer(&self, peer: usize) -> Result<(), CommError> {
        if peer >= self.size {
            return Err(CommError::InvalidPeer { peer, size: self.size });
        }
        Ok(())
    }
}

pub struct ThreadSend;

impl Wait for ThreadSend {
    type Output = ();
    fn wait(self) -> Result<(), CommError> {
        Ok(())
    }
}

pub struct ThreadRecv {
    mailbox: Arc<Mailbox>,
    key: MailKey,
    timeout: Duration,
}

impl Wait for ThreadRecv {
    type Output = Vec<u8>;

    fn wait(self) -> Result<Vec<u8>, CommError> {
        let (src, _, tag) = self.key;
        let fail = |reason: String| CommError::Wait { peer: src, tag, reason };
        let deadline = Instant::now() + self.timeout;
        let mut queues = self.mailbox.queues.lock().map_err(|_| fail("mailbox poisoned".into()))?;
        loop {
            if let Some(msg) = queues.get_mut(&self.key).and_then(VecDeque::pop_front) {
                return Ok(msg);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(fail(format!("no message after {:?}", self.timeout)));
            }
            let (guard, _) = self
                .mailbox
                .arrived
                .wait_timeout(queues, deadline - now)
                .map_err(|_| fail("mailbox poisoned".into()))?;
            queues = guard;
        }
    }
}

impl Communicator for ThreadComm {
    type SendHandle = ThreadSend;
    type RecvHandle = ThreadRecv;

    fn rank(&self) -> usize { self.rank }
    fn size(&self) -> usize { self.size }

    fn isend(&self, peer: usize, tag: CommTag, buf: &[u8]) -> Result<ThreadSend, CommError> {
        self.check_peer(peer)?;
        let mut queues = self.mailbox.queues.lock().map_err(|_| CommError::Post {
            peer,
            tag,
            reason: "mailbox poisoned".into(),
        })?;
        queues.entry((self.rank, peer, tag)).or_default().push_back(buf.to_vec());
        drop(queues);
        self.mailbox.arrived.notify_all();
        Ok(ThreadSend)
    }

    fn irecv(&self, peer: usize, tag: CommTag) -> Result<ThreadRecv, CommError> {
        self.check_peer(peer)?;
        Ok(ThreadRecv {
            mailbox: Arc::clone(&self.mailbox),
            key: (peer, self.rank, tag),
            timeout: self.timeout,
        })
    }

    fn barrier(&self) {
        self.mailbox.barrier.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn messages_match_on_tag() {
        let mut comms = ThreadComm::universe(2);
        let c1 = comms.pop().unwrap();
        let c0 = comms.pop().unwrap();
        let h = thread::spawn(move || {
            c1.isend(0, CommTag::new(2), b"two").unwrap().wait().unwrap();
            c1.isend(0, CommTag::new(1), b"one").unwrap().wait().unwrap();
        });
        let r1 = c0.irecv(1, CommTag::new(1)).unwrap();
        let r2 = c0.irecv(1, CommTag::new(2)).unwrap();
        assert_eq!(r1.wait().unwrap(), b"one");
        assert_eq!(r2.wait().unwrap(), b"two");
        h.join().unwrap();
    }

    #[test]
    fn same_tag_is_fifo() {
        let comms = ThreadComm::universe(2);
        comms[0].isend(1, CommTag::new(7), &[1]).unwrap();
        comms[0].isend(1, CommTag::new(7), &[2]).unwrap();
        assert_eq!(comms[1].irecv(0, CommTag::new(7)).unwrap().wait().unwrap(), vec![1]);
        assert_eq!(comms[1].irecv(0, CommTag::new(7)).unwrap().wait().unwrap(), vec![2]);
    }

    #[test]
    fn missing_message_times_out() {
        let comms = ThreadComm::universe(2);
        let c0 = comms[0].clone().with_timeout(Duration::from_millis(20));
        let err = c0.irecv(1, CommTag::new(0)).unwrap().wait().unwrap_err();
        assert!(matches!(err, CommError::Wait { peer: 1, .. }));
    }

    #[test]
    fn invalid_peer_rejected_at_post() {
        let comms = ThreadComm::universe(2);
        assert!(matches!(
            comms[0].isend(5, CommTag::new(0), &[]),
            Err(CommError::InvalidPeer { peer: 5, size: 2 })
        ));
    }
}

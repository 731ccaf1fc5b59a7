//! In-process communicator
//!
//! Each rank is a thread; each `(context, rank)` pair owns a mailbox. A split
//! allocates fresh context ids on rank 0 so traffic on different communicators
//! never mixes.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::{decode, encode, Comm, CommError, Communicator, Envelope, Tag};

const SPLIT: Tag = Tag(Tag::RESERVED_BASE + 3);

#[derive(Default)]
struct Mailbox {
    queue: Mutex<VecDeque<Envelope>>,
    ready: Condvar,
}

impl Mailbox {
    fn push(&self, envelope: Envelope) {
        self.queue.lock().push_back(envelope);
        self.ready.notify_all();
    }

    fn take(queue: &mut VecDeque<Envelope>, source: Option<usize>, tags: &[Tag]) -> Option<Envelope> {
        let pos = queue.iter().position(|e| {
            source.map_or(true, |s| e.source == s) && (tags.is_empty() || tags.contains(&e.tag))
        })?;
        queue.remove(pos)
    }
}

struct Fabric {
    hosts: Vec<String>,
    mailboxes: Mutex<HashMap<(u64, usize), Arc<Mailbox>>>,
    next_context: AtomicU64,
}

impl Fabric {
    fn mailbox(&self, context: u64, rank: usize) -> Arc<Mailbox> {
        Arc::clone(self.mailboxes.lock().entry((context, rank)).or_default())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Assignment {
    context: u64,
    rank: usize,
    members: Vec<usize>,
}

struct LocalComm {
    fabric: Arc<Fabric>,
    context: u64,
    rank: usize,
    /// World rank of every member, indexed by rank in this communicator.
    members: Arc<Vec<usize>>,
    inbox: Arc<Mailbox>,
}

impl LocalComm {
    fn new(fabric: Arc<Fabric>, context: u64, rank: usize, members: Arc<Vec<usize>>) -> Self {
        let inbox = fabric.mailbox(context, rank);
        Self {
            fabric,
            context,
            rank,
            members,
            inbox,
        }
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.members.len()
    }

    fn processor_name(&self) -> String {
        self.fabric.hosts[self.members[self.rank]].clone()
    }

    fn send(&self, dest: usize, tag: Tag, payload: Vec<u8>) -> Result<(), CommError> {
        if dest >= self.size() {
            return Err(CommError::RankOutOfRange {
                rank: dest,
                size: self.size(),
            });
        }
        self.fabric.mailbox(self.context, dest).push(Envelope {
            source: self.rank,
            tag,
            payload,
        });
        Ok(())
    }

    fn recv(&self, source: Option<usize>, tags: &[Tag]) -> Result<Envelope, CommError> {
        let mut queue = self.inbox.queue.lock();
        loop {
            if let Some(envelope) = Mailbox::take(&mut queue, source, tags) {
                return Ok(envelope);
            }
            self.inbox.ready.wait(&mut queue);
        }
    }

    fn try_recv(
        &self,
        source: Option<usize>,
        tags: &[Tag],
    ) -> Result<Option<Envelope>, CommError> {
        let mut queue = self.inbox.queue.lock();
        Ok(Mailbox::take(&mut queue, source, tags))
    }

    fn split(&self, color: Option<i64>, key: i64) -> Result<Option<Comm>, CommError> {
        let request = encode(SPLIT, &(color, key))?;
        let requests = self.gather(0, request)?;

        let mut table: Vec<Option<Assignment>> = Vec::new();
        if self.rank == 0 {
            let mut parsed = Vec::with_capacity(requests.len());
            for (rank, bytes) in requests.iter().enumerate() {
                let (color, key): (Option<i64>, i64) = decode(SPLIT, bytes)?;
                parsed.push((rank, color, key));
            }

            let mut groups: Vec<(i64, Vec<(i64, usize)>)> = Vec::new();
            for &(rank, color, key) in &parsed {
                let Some(color) = color else { continue };
                match groups.iter_mut().find(|(c, _)| *c == color) {
                    Some((_, members)) => members.push((key, rank)),
                    None => groups.push((color, vec![(key, rank)])),
                }
            }

            table = (0..parsed.len()).map(|_| None).collect();
            for (_, mut members) in groups {
                members.sort_unstable();
                let context = self.fabric.next_context.fetch_add(1, Ordering::Relaxed);
                let world: Vec<usize> = members.iter().map(|&(_, r)| self.members[r]).collect();
                for (new_rank, &(_, parent_rank)) in members.iter().enumerate() {
                    table[parent_rank] = Some(Assignment {
                        context,
                        rank: new_rank,
                        members: world.clone(),
                    });
                }
            }
        }

        let bytes = self.broadcast(0, encode(SPLIT, &table)?)?;
        let mut table: Vec<Option<Assignment>> = decode(SPLIT, &bytes)?;
        let mine = table
            .get_mut(self.rank)
            .and_then(Option::take);

        Ok(mine.map(|a| {
            debug!(context = a.context, rank = a.rank, size = a.members.len(), "split communicator");
            Arc::new(LocalComm::new(
                Arc::clone(&self.fabric),
                a.context,
                a.rank,
                Arc::new(a.members),
            )) as Comm
        }))
    }

    fn abort(&self, code: i32) -> ! {
        error!(rank = self.rank, code, "aborting process group");
        std::process::abort()
    }
}

/// Process group made of threads in the current process
pub struct LocalCluster;

impl LocalCluster {
    /// World communicators for `size` ranks on a single node.
    pub fn communicators(size: usize) -> Vec<Comm> {
        let hosts = vec!["localhost".to_string(); size];
        Self::communicators_on_hosts(&hosts)
    }

    /// World communicators, rank `i` running on node `hosts[i]`.
    pub fn communicators_on_hosts<S: AsRef<str>>(hosts: &[S]) -> Vec<Comm> {
        let fabric = Arc::new(Fabric {
            hosts: hosts.iter().map(|h| h.as_ref().to_string()).collect(),
            mailboxes: Mutex::new(HashMap::new()),
            next_context: AtomicU64::new(1),
        });
        let members = Arc::new((0..hosts.len()).collect::<Vec<_>>());
        (0..hosts.len())
            .map(|rank| {
                Arc::new(LocalComm::new(Arc::clone(&fabric), 0, rank, Arc::clone(&members)))
                    as Comm
            })
            .collect()
    }

    /// Run `f` on `size` ranks and return the results in rank order.
    pub fn run<R, F>(size: usize, f: F) -> Vec<R>
    where
        F: Fn(Comm) -> R + Sync,
        R: Send,
    {
        Self::spawn(Self::communicators(size), f)
    }

    /// Like [`LocalCluster::run`], with rank `i` placed on node `hosts[i]`.
    pub fn run_on_hosts<S, R, F>(hosts: &[S], f: F) -> Vec<R>
    where
        S: AsRef<str>,
        F: Fn(Comm) -> R + Sync,
        R: Send,
    {
        Self::spawn(Self::communicators_on_hosts(hosts), f)
    }

    fn spawn<R, F>(comms: Vec<Comm>, f: F) -> Vec<R>
    where
        F: Fn(Comm) -> R + Sync,
        R: Send,
    {
        let f = &f;
        thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| scope.spawn(move || f(comm)))
                .collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(value) => value,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }
}

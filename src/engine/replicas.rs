use nix::unistd::Pid;
use parking_lot::Mutex;

/// Live child pids of one program. Insertion order is preserved so the most
/// recently spawned replica sits at the tail; the lock is never held across
/// a blocking syscall.
#[derive(Debug, Default)]
pub struct ReplicaSet {
    pids: Mutex<Vec<Pid>>,
}

impl ReplicaSet {
    pub fn insert(&self, pid: Pid) {
        let mut pids = self.pids.lock();
        if !pids.contains(&pid) {
            pids.push(pid);
        }
    }

    /// Returns true when the pid was present. A pid leaves the set exactly
    /// once; the caller that removed it owns the exit handling.
    pub fn remove(&self, pid: Pid) -> bool {
        let mut pids = self.pids.lock();
        match pids.iter().position(|candidate| *candidate == pid) {
            Some(index) => {
                pids.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn remove_last(&self) -> Option<Pid> {
        self.pids.lock().pop()
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.pids.lock().contains(&pid)
    }

    /// Copy of the current pids so iteration happens outside the lock.
    pub fn snapshot(&self) -> Vec<Pid> {
        self.pids.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.pids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pids.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(raw: i32) -> Pid {
        Pid::from_raw(raw)
    }

    #[test]
    fn insert_and_remove_round_trip() {
        let set = ReplicaSet::default();
        assert!(set.is_empty());

        set.insert(pid(10));
        set.insert(pid(20));
        assert_eq!(set.count(), 2);
        assert!(set.contains(pid(10)));

        assert!(set.remove(pid(10)));
        assert!(!set.remove(pid(10)));
        assert_eq!(set.snapshot(), vec![pid(20)]);
    }

    #[test]
    fn duplicate_inserts_are_ignored() {
        let set = ReplicaSet::default();
        set.insert(pid(7));
        set.insert(pid(7));
        assert_eq!(set.count(), 1);
    }

    #[test]
    fn remove_last_pops_the_most_recent_pid() {
        let set = ReplicaSet::default();
        set.insert(pid(1));
        set.insert(pid(2));
        set.insert(pid(3));

        assert_eq!(set.remove_last(), Some(pid(3)));
        assert_eq!(set.remove_last(), Some(pid(2)));
        assert_eq!(set.remove_last(), Some(pid(1)));
        assert_eq!(set.remove_last(), None);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let set = ReplicaSet::default();
        set.insert(pid(5));
        let snapshot = set.snapshot();
        set.remove(pid(5));
        assert_eq!(snapshot, vec![pid(5)]);
        assert!(set.is_empty());
    }
}

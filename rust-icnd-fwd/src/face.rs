//! Face bookkeeping for the link layer.
//!
//! Every remote peer gets a stable integer face id. The table is shared
//! between the link layer and the autoconfig server (which allocates
//! static faces for registered services), so it lives behind a mutex.

use log::debug;
use rust_icnd_common::types::FaceId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// Address record for a face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressInfo {
    pub addr: SocketAddr,
    /// Static faces are never reclaimed while the forwarder runs.
    pub static_face: bool,
}

impl AddressInfo {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            static_face: false,
        }
    }

    pub fn static_to(addr: SocketAddr) -> Self {
        Self {
            addr,
            static_face: true,
        }
    }
}

/// Bidirectional face id <-> address table.
///
/// Face id 0 is reserved for the application side and never allocated.
#[derive(Debug, Default)]
pub struct FaceTable {
    next: u32,
    by_fid: HashMap<FaceId, AddressInfo>,
    by_addr: HashMap<SocketAddr, FaceId>,
}

impl FaceTable {
    pub fn new() -> Self {
        Self {
            next: 1,
            by_fid: HashMap::new(),
            by_addr: HashMap::new(),
        }
    }

    /// Return the face id for `addr`, allocating a fresh one if the peer
    /// is new. An existing face is promoted to static if requested, never
    /// demoted.
    pub fn get_or_create(&mut self, addr: SocketAddr, static_face: bool) -> FaceId {
        if let Some(&fid) = self.by_addr.get(&addr) {
            if static_face {
                if let Some(info) = self.by_fid.get_mut(&fid) {
                    info.static_face = true;
                }
            }
            return fid;
        }
        let fid = FaceId(self.next);
        self.next += 1;
        debug!("allocated {fid} for {addr}");
        self.by_fid.insert(
            fid,
            AddressInfo {
                addr,
                static_face,
            },
        );
        self.by_addr.insert(addr, fid);
        fid
    }

    /// Install a face under a caller-chosen id (used by tests and static
    /// route seeding). Later allocations skip past `fid`.
    pub fn add(&mut self, fid: FaceId, info: AddressInfo) {
        self.next = self.next.max(fid.0 + 1);
        self.by_addr.insert(info.addr, fid);
        self.by_fid.insert(fid, info);
    }

    pub fn address(&self, fid: FaceId) -> Option<SocketAddr> {
        self.by_fid.get(&fid).map(|info| info.addr)
    }

    pub fn fid(&self, addr: SocketAddr) -> Option<FaceId> {
        self.by_addr.get(&addr).copied()
    }

    pub fn remove(&mut self, fid: FaceId) {
        if let Some(info) = self.by_fid.remove(&fid) {
            self.by_addr.remove(&info.addr);
        }
    }

    pub fn len(&self) -> usize {
        self.by_fid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_fid.is_empty()
    }
}

/// The face table handle shared between stages.
pub type SharedFaceTable = Arc<Mutex<FaceTable>>;

pub fn shared_face_table() -> SharedFaceTable {
    Arc::new(Mutex::new(FaceTable::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn allocation_is_stable_and_skips_local() {
        let mut table = FaceTable::new();
        let a = table.get_or_create(addr("127.0.0.1:4000"), false);
        let b = table.get_or_create(addr("127.0.0.2:4000"), false);
        assert_eq!(a, FaceId(1));
        assert_eq!(b, FaceId(2));
        // same peer, same id
        assert_eq!(table.get_or_create(addr("127.0.0.1:4000"), false), a);
        assert_eq!(table.address(a), Some(addr("127.0.0.1:4000")));
        assert_eq!(table.fid(addr("127.0.0.2:4000")), Some(b));
    }

    #[test]
    fn static_promotion_sticks() {
        let mut table = FaceTable::new();
        let fid = table.get_or_create(addr("127.0.0.1:4000"), false);
        table.get_or_create(addr("127.0.0.1:4000"), true);
        // still one face, now static
        assert_eq!(table.len(), 1);
        table.get_or_create(addr("127.0.0.1:4000"), false);
        assert!(table.by_fid.get(&fid).unwrap().static_face);
    }

    #[test]
    fn explicit_add_reserves_id_range() {
        let mut table = FaceTable::new();
        table.add(FaceId(42), AddressInfo::new(addr("127.13.37.42:4567")));
        let next = table.get_or_create(addr("127.0.0.9:1234"), false);
        assert_eq!(next, FaceId(43));
        assert_eq!(table.address(FaceId(42)), Some(addr("127.13.37.42:4567")));
    }

    #[test]
    fn remove_forgets_both_directions() {
        let mut table = FaceTable::new();
        let fid = table.get_or_create(addr("127.0.0.1:4000"), false);
        table.remove(fid);
        assert!(table.is_empty());
        assert_eq!(table.fid(addr("127.0.0.1:4000")), None);
    }
}

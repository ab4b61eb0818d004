//! Routing Information Base.
//!
//! A rooted tree whose edges are labelled with name components, so the
//! path from the root to a node spells a name. Each node carries a
//! distance vector `face -> (distance, deadline)`. The tree ingests
//! distance-vector routes, ages them on a monotonic clock, and collapses
//! into a longest-prefix-minimal route list for the FIB.
//!
//! Ordered maps keep iteration deterministic, so two collapses of the
//! same tree always produce the same route list.

use bytes::Bytes;
use log::debug;
use rust_icnd_common::{
    name::{Name, NameComponent},
    types::FaceId,
};
use std::collections::BTreeMap;
use std::time::Instant;

use crate::tables::Fib;

/// A collapsed route ready for FIB insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RibRoute {
    pub name: Name,
    pub face: FaceId,
    pub distance: u32,
    pub expires: Instant,
}

#[derive(Debug, Default)]
struct RibNode {
    children: BTreeMap<Bytes, RibNode>,
    distance_vector: BTreeMap<FaceId, (u32, Instant)>,
}

impl RibNode {
    fn is_empty(&self) -> bool {
        self.children.is_empty() && self.distance_vector.is_empty()
    }

    /// The face with the minimal distance to this node's name; ties break
    /// towards the smallest face id (map order).
    fn best_face(&self) -> (FaceId, u32, Instant) {
        let (fid, (dist, expires)) = self
            .distance_vector
            .iter()
            .min_by_key(|(fid, (dist, _))| (*dist, **fid))
            .expect("best_face on empty distance vector");
        (*fid, *dist, *expires)
    }

    fn own_routes(&self, shortest_only: bool) -> Vec<(Vec<Bytes>, FaceId, u32, Instant)> {
        if self.distance_vector.is_empty() {
            return Vec::new();
        }
        if shortest_only {
            let (fid, dist, expires) = self.best_face();
            vec![(Vec::new(), fid, dist, expires)]
        } else {
            self.distance_vector
                .iter()
                .map(|(fid, (dist, expires))| (Vec::new(), *fid, *dist, *expires))
                .collect()
        }
    }

    /// Collapse the subtree below this node into a longest-prefix-minimal
    /// route list. Returned names are relative to this node.
    fn collapse(&self, shortest_only: bool) -> Vec<(Vec<Bytes>, FaceId, u32, Instant)> {
        if self.children.is_empty() {
            return self.own_routes(shortest_only);
        }

        // collapse each child and prepend its edge label
        let mut candidates: Vec<(Vec<Bytes>, FaceId, u32, Instant)> = Vec::new();
        for (label, child) in &self.children {
            for (mut name, fid, dist, expires) in child.collapse(shortest_only) {
                name.insert(0, label.clone());
                candidates.push((name, fid, dist, expires));
            }
        }
        candidates.extend(self.own_routes(shortest_only));

        // a shorter candidate covers every longer candidate on the same
        // face under longest-prefix lookup; keep the shorter one, with
        // the minimal metric of everything it absorbs, so the route list
        // stays prefix-minimal per face
        let mut minimal: Vec<(Vec<Bytes>, FaceId, u32, Instant)> = Vec::new();
        for (name, fid, dist, expires) in &candidates {
            let covered = candidates.iter().any(|(other, other_fid, _, _)| {
                other_fid == fid
                    && other.len() < name.len()
                    && other.iter().zip(name.iter()).all(|(a, b)| a == b)
            });
            if covered {
                continue;
            }
            let (dist, expires) = candidates
                .iter()
                .filter(|(other, other_fid, _, _)| {
                    other_fid == fid
                        && name.len() <= other.len()
                        && name.iter().zip(other.iter()).all(|(a, b)| a == b)
                })
                .map(|(_, _, d, e)| (*d, *e))
                .min()
                .unwrap_or((*dist, *expires));
            minimal.push((name.clone(), *fid, dist, expires));
        }
        let candidates = minimal;

        // if the whole subtree exits through a single face, one prefix
        // entry at this node covers it
        let mut faces = candidates.iter().map(|(_, fid, _, _)| *fid);
        let first = faces.next();
        let single_face = first.map_or(false, |f| faces.all(|other| other == f));
        if single_face && candidates.len() > 1 {
            let face = first.unwrap();
            let (dist, expires) = candidates
                .iter()
                .map(|(_, _, dist, expires)| (*dist, *expires))
                .min()
                .unwrap();
            return vec![(Vec::new(), face, dist, expires)];
        }
        candidates
    }

    fn age(&mut self, now: Instant) {
        for child in self.children.values_mut() {
            child.age(now);
        }
        // prune empty leaves; the recursion makes removal cascade upward
        self.children.retain(|_, child| !child.is_empty());
        self.distance_vector.retain(|_, (_, expires)| *expires > now);
    }
}

/// Tree-structured RIB with periodic aging and FIB compilation.
#[derive(Debug)]
pub struct Rib {
    root: RibNode,
    /// When set, only the minimal-distance face of each name is compiled
    /// into the FIB; otherwise every face is.
    shortest_only: bool,
}

impl Rib {
    pub fn new(shortest_only: bool) -> Self {
        Self {
            root: RibNode::default(),
            shortest_only,
        }
    }

    /// Insert or overwrite the route for `(name, face)`.
    pub fn insert(&mut self, name: &Name, face: FaceId, distance: u32, expires: Instant) {
        let mut node = &mut self.root;
        for component in name.components() {
            node = node.children.entry(component.0.clone()).or_default();
        }
        node.distance_vector.insert(face, (distance, expires));
    }

    /// Remove distance-vector entries whose deadline has passed and prune
    /// nodes left without children and routes.
    pub fn age(&mut self, now: Instant) {
        self.root.age(now);
    }

    /// Longest-prefix-minimal representation of the current routes.
    pub fn collapse(&self) -> Vec<RibRoute> {
        self.root
            .collapse(self.shortest_only)
            .into_iter()
            .map(|(components, face, distance, expires)| RibRoute {
                name: Name::from_components(
                    components.into_iter().map(NameComponent::from).collect(),
                ),
                face,
                distance,
                expires,
            })
            .collect()
    }

    /// Compile the RIB into `fib`: all non-static entries are replaced by
    /// the collapsed route set in one step.
    pub fn build_fib(&self, fib: &mut Fib) {
        let routes = self.collapse();
        debug!("compiling {} collapsed routes into the FIB", routes.len());
        fib.replace_non_static(routes.into_iter().map(|r| (r.name, r.face)));
    }

    pub fn len(&self) -> usize {
        self.collapse().len()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }
}

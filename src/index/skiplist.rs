//! Rank structure for sorted sets.
//!
//! A skip list ordered by `(score, member)` with per-level spans, so rank
//! and range-by-rank are O(log n).
//!
//! ```text
//! Level 2:  HEAD ───────────4──────────► b(2.0) ─────────────────► NIL
//! Level 1:  HEAD ──1──► a(1.0) ───3────► b(2.0) ──1──► c(3.0) ───► NIL
//! Level 0:  HEAD ──1──► a(1.0) ─1─► x ─1─► b(2.0) ──1──► c(3.0) ──► NIL
//!                       ◄──────────backward────────────
//! ```
//!
//! Nodes live in an arena (`Vec<Node>`) and link to each other by index;
//! freed slots are recycled through a free list. Index 0 is the head.

use std::collections::HashMap;

/// Maximum height of the skip list.
pub const MAX_LEVEL: usize = 32;

/// Probability of promoting a node one level up.
const LEVEL_P: f64 = 0.25;

const HEAD: usize = 0;

#[derive(Debug, Clone, Copy, Default)]
struct Level {
    forward: Option<usize>,
    /// Number of level-0 steps this link jumps over.
    span: usize,
}

#[derive(Debug)]
struct Node {
    member: Vec<u8>,
    score: f64,
    backward: Option<usize>,
    levels: Vec<Level>,
}

#[derive(Debug)]
pub struct SkipList {
    nodes: Vec<Node>,
    free: Vec<usize>,
    tail: Option<usize>,
    len: usize,
    level: usize,
}

impl SkipList {
    pub fn new() -> Self {
        let head = Node {
            member: Vec::new(),
            score: 0.0,
            backward: None,
            levels: vec![Level::default(); MAX_LEVEL],
        };
        Self {
            nodes: vec![head],
            free: Vec::new(),
            tail: None,
            len: 0,
            level: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn random_level() -> usize {
        let mut level = 1;
        while level < MAX_LEVEL && fastrand::f64() < LEVEL_P {
            level += 1;
        }
        level
    }

    /// Whether the node at `idx` sorts strictly before `(score, member)`.
    fn precedes(&self, idx: usize, score: f64, member: &[u8]) -> bool {
        let node = &self.nodes[idx];
        node.score < score || (node.score == score && node.member.as_slice() < member)
    }

    fn alloc(&mut self, node: Node) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, idx: usize) {
        let node = &mut self.nodes[idx];
        node.member = Vec::new();
        node.levels = Vec::new();
        node.backward = None;
        self.free.push(idx);
    }

    /// Insert `(score, member)`. The caller guarantees the pair is not present.
    pub fn insert(&mut self, score: f64, member: Vec<u8>) {
        let mut update = [HEAD; MAX_LEVEL];
        let mut rank = [0usize; MAX_LEVEL];

        let mut x = HEAD;
        for i in (0..self.level).rev() {
            rank[i] = if i == self.level - 1 { 0 } else { rank[i + 1] };
            while let Some(next) = self.nodes[x].levels[i].forward {
                if !self.precedes(next, score, &member) {
                    break;
                }
                rank[i] += self.nodes[x].levels[i].span;
                x = next;
            }
            update[i] = x;
        }

        let level = Self::random_level();
        if level > self.level {
            for i in self.level..level {
                rank[i] = 0;
                update[i] = HEAD;
                self.nodes[HEAD].levels[i].span = self.len;
            }
            self.level = level;
        }

        let idx = self.alloc(Node {
            member,
            score,
            backward: None,
            levels: vec![Level::default(); level],
        });

        for i in 0..level {
            let prev = update[i];
            let prev_link = self.nodes[prev].levels[i];
            let jumped = rank[0] - rank[i];

            self.nodes[idx].levels[i] = Level {
                forward: prev_link.forward,
                span: prev_link.span - jumped,
            };
            self.nodes[prev].levels[i] = Level {
                forward: Some(idx),
                span: jumped + 1,
            };
        }

        for i in level..self.level {
            self.nodes[update[i]].levels[i].span += 1;
        }

        self.nodes[idx].backward = if update[0] == HEAD { None } else { Some(update[0]) };
        match self.nodes[idx].levels[0].forward {
            Some(next) => self.nodes[next].backward = Some(idx),
            None => self.tail = Some(idx),
        }
        self.len += 1;
    }

    /// Remove `(score, member)`; returns whether it was present.
    pub fn delete(&mut self, score: f64, member: &[u8]) -> bool {
        let mut update = [HEAD; MAX_LEVEL];
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.nodes[x].levels[i].forward {
                if !self.precedes(next, score, member) {
                    break;
                }
                x = next;
            }
            update[i] = x;
        }

        match self.nodes[x].levels[0].forward {
            Some(target)
                if self.nodes[target].score == score && self.nodes[target].member.as_slice() == member =>
            {
                self.unlink(target, &update);
                self.release(target);
                true
            }
            _ => false,
        }
    }

    fn unlink(&mut self, x: usize, update: &[usize; MAX_LEVEL]) {
        for i in 0..self.level {
            let prev = update[i];
            if self.nodes[prev].levels[i].forward == Some(x) {
                let removed = self.nodes[x].levels[i];
                let link = &mut self.nodes[prev].levels[i];
                link.span = link.span + removed.span - 1;
                link.forward = removed.forward;
            } else {
                self.nodes[prev].levels[i].span -= 1;
            }
        }

        let backward = self.nodes[x].backward;
        match self.nodes[x].levels[0].forward {
            Some(next) => self.nodes[next].backward = backward,
            None => self.tail = backward,
        }

        while self.level > 1 && self.nodes[HEAD].levels[self.level - 1].forward.is_none() {
            self.level -= 1;
        }
        self.len -= 1;
    }

    /// 1-based rank of `(score, member)`.
    pub fn rank(&self, score: f64, member: &[u8]) -> Option<usize> {
        let mut rank = 0;
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.nodes[x].levels[i].forward {
                let node = &self.nodes[next];
                let not_after = node.score < score || (node.score == score && node.member.as_slice() <= member);
                if !not_after {
                    break;
                }
                rank += self.nodes[x].levels[i].span;
                x = next;
            }
            if x != HEAD && self.nodes[x].score == score && self.nodes[x].member.as_slice() == member {
                return Some(rank);
            }
        }
        None
    }

    /// Arena index of the node at 1-based `rank`.
    fn by_rank(&self, rank: usize) -> Option<usize> {
        let mut traversed = 0;
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.nodes[x].levels[i].forward {
                let span = self.nodes[x].levels[i].span;
                if traversed + span > rank {
                    break;
                }
                traversed += span;
                x = next;
            }
            if traversed == rank && x != HEAD {
                return Some(x);
            }
        }
        None
    }

    /// Members with scores between zero-based ranks `start` and `stop`
    /// inclusive; negative ranks count from the end.
    pub fn range(&self, start: i64, stop: i64, reverse: bool) -> Vec<(Vec<u8>, f64)> {
        let len = self.len as i64;
        let mut start = if start < 0 { len + start } else { start };
        let mut stop = if stop < 0 { len + stop } else { stop };
        if start < 0 {
            start = 0;
        }
        if start > stop || start >= len {
            return Vec::new();
        }
        if stop >= len {
            stop = len - 1;
        }

        let count = (stop - start + 1) as usize;
        let mut out = Vec::with_capacity(count);
        let mut cursor = if reverse {
            self.by_rank((len - start) as usize)
        } else {
            self.by_rank(start as usize + 1)
        };

        while let Some(idx) = cursor {
            if out.len() == count {
                break;
            }
            let node = &self.nodes[idx];
            out.push((node.member.clone(), node.score));
            cursor = if reverse { node.backward } else { node.levels[0].forward };
        }
        out
    }

    /// Every `(member, score)` in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], f64)> + '_ {
        let mut cursor = self.nodes[HEAD].levels[0].forward;
        std::iter::from_fn(move || {
            let idx = cursor?;
            let node = &self.nodes[idx];
            cursor = node.levels[0].forward;
            Some((node.member.as_slice(), node.score))
        })
    }
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}

/// Member → score dictionary plus the rank skip list of one sorted set.
#[derive(Debug, Default)]
pub struct SortedSet {
    dict: HashMap<Vec<u8>, f64>,
    list: SkipList,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or re-score `member`, keeping exactly one rank node for it.
    pub fn add(&mut self, member: &[u8], score: f64) {
        match self.dict.get(member) {
            Some(&old) if old == score => return,
            Some(&old) => {
                self.list.delete(old, member);
            }
            None => {}
        }
        self.list.insert(score, member.to_vec());
        self.dict.insert(member.to_vec(), score);
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.dict.get(member).copied()
    }

    /// Remove `member`, returning its score.
    pub fn remove(&mut self, member: &[u8]) -> Option<f64> {
        let score = self.dict.remove(member)?;
        self.list.delete(score, member);
        Some(score)
    }

    pub fn card(&self) -> usize {
        self.dict.len()
    }

    /// Zero-based rank, ascending or descending.
    pub fn rank(&self, member: &[u8], reverse: bool) -> Option<usize> {
        let score = self.dict.get(member)?;
        let rank = self.list.rank(*score, member)? - 1;
        if reverse {
            Some(self.list.len() - 1 - rank)
        } else {
            Some(rank)
        }
    }

    pub fn range(&self, start: i64, stop: i64, reverse: bool) -> Vec<(Vec<u8>, f64)> {
        self.list.range(start, stop, reverse)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], f64)> + '_ {
        self.list.iter()
    }
}

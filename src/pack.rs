//! Bank assignment: overload-and-remove pagination
//!
//! Cels joined by `related` are coalesced into atomic items; items are
//! seeded greedily into banks (best tile-set intersection first) and an
//! overload-and-remove loop then tries to eliminate banks: the smallest
//! bank's items are forced into the others past capacity, and overloaded
//! banks evict the member whose tiles are least shared until everything
//! fits again. The loop keeps a round only when it lowered the bank count,
//! so the result never regresses below the greedy seed.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::models::SheetDoc;
use crate::raster::CelRaster;

/// Bound on overload/remove rounds before the packer gives up.
pub const ITERATION_CAP: usize = 1000;

/// Error type for bank-assignment failures.
#[derive(Debug, Error)]
pub enum PackError {
    #[error("frame '{cel}' needs {tiles} distinct tiles and related company; a bank holds {capacity}")]
    CelTooLarge { cel: String, tiles: usize, capacity: usize },
    #[error("bank packing did not converge within {ITERATION_CAP} rounds")]
    IterationCap,
}

/// One bank: member cels in placement order and tile IDs in slot order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bank {
    pub cels: Vec<usize>,
    pub tiles: Vec<u16>,
}

impl Bank {
    /// Slot of a tile within this bank.
    pub fn position(&self, id: u16) -> Option<usize> {
        self.tiles.binary_search(&id).ok()
    }
}

/// The finished assignment: banks, global cel-ID slots, and per-cel maps.
#[derive(Debug, Clone)]
pub struct Packing {
    pub banks: Vec<Bank>,
    /// Cel IDs in emission order; `None` slots are alignment padding.
    pub slots: Vec<Option<usize>>,
    /// cel index -> cel ID
    pub id_of: Vec<usize>,
    /// cel index -> bank index
    pub bank_of: Vec<usize>,
}

impl Packing {
    pub fn num_frames(&self) -> usize {
        self.slots.len()
    }
}

/// An atomic unit for the packer: a `related` group of cels.
#[derive(Debug, Clone)]
struct Item {
    cels: Vec<usize>,
    tiles: BTreeSet<u16>,
}

#[derive(Debug, Clone, Default)]
struct Bin {
    /// (item index, insertion sequence)
    items: Vec<(usize, usize)>,
    tiles: BTreeSet<u16>,
}

impl Bin {
    fn would_hold(&self, tiles: &BTreeSet<u16>, capacity: usize) -> bool {
        self.tiles.union(tiles).count() <= capacity
    }

    fn shared(&self, tiles: &BTreeSet<u16>) -> usize {
        self.tiles.intersection(tiles).count()
    }

    fn insert(&mut self, item: usize, tiles: &BTreeSet<u16>, seq: &mut usize) {
        *seq += 1;
        self.items.push((item, *seq));
        self.tiles.extend(tiles.iter().copied());
    }

    fn rebuild_tiles(&mut self, items: &[Item]) {
        self.tiles.clear();
        for &(i, _) in &self.items {
            self.tiles.extend(items[i].tiles.iter().copied());
        }
    }

    /// Tiles no other member of this bin needs.
    fn unique_to(&self, member: usize, items: &[Item]) -> usize {
        items[member]
            .tiles
            .iter()
            .filter(|t| {
                !self
                    .items
                    .iter()
                    .any(|&(other, _)| other != member && items[other].tiles.contains(t))
            })
            .count()
    }
}

/// Assign every cel to a bank and number the cels.
pub fn pack(doc: &SheetDoc, rasters: &[CelRaster], bank_size: usize) -> Result<Packing, PackError> {
    let items = build_items(doc, rasters);
    for item in &items {
        if item.tiles.len() > bank_size {
            let first = item.cels[0];
            return Err(PackError::CelTooLarge {
                cel: doc.cels[first].name.clone(),
                tiles: item.tiles.len(),
                capacity: bank_size,
            });
        }
    }

    let bins = solve(&items, bank_size)?;

    let mut banks = Vec::with_capacity(bins.len());
    for bin in &bins {
        let mut cels = Vec::new();
        for &(item, _) in &bin.items {
            cels.extend(items[item].cels.iter().copied());
        }
        banks.push(Bank { cels, tiles: bin.tiles.iter().copied().collect() });
    }

    // Number the cels by walking the banks in order, padding ahead of
    // alignment-constrained cels.
    let mut slots = Vec::new();
    let mut id_of = vec![0; doc.cels.len()];
    let mut bank_of = vec![0; doc.cels.len()];
    for (b, bank) in banks.iter().enumerate() {
        for &cel in &bank.cels {
            let align = doc.cels[cel].align as usize;
            if align > 1 {
                while slots.len() % align != 0 {
                    slots.push(None);
                }
            }
            id_of[cel] = slots.len();
            bank_of[cel] = b;
            slots.push(Some(cel));
        }
    }

    Ok(Packing { banks, slots, id_of, bank_of })
}

/// Coalesce `related` cels into atomic items, `subset` items first.
fn build_items(doc: &SheetDoc, rasters: &[CelRaster]) -> Vec<Item> {
    let n = doc.cels.len();
    let mut uf = UnionFind::new(n);
    for &(a, b) in &doc.related {
        uf.union(a, b);
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&i| (!doc.cels[i].subset, i));

    let mut seen = vec![false; n];
    let mut items = Vec::new();
    for i in order {
        let root = uf.find(i);
        if seen[root] {
            continue;
        }
        seen[root] = true;
        let cels: Vec<usize> = (0..n).filter(|&j| uf.find(j) == root).collect();
        let tiles = cels.iter().flat_map(|&c| rasters[c].tile_set.iter().copied()).collect();
        items.push(Item { cels, tiles });
    }
    items
}

fn solve(items: &[Item], capacity: usize) -> Result<Vec<Bin>, PackError> {
    let mut seq = 0;
    let mut bins: Vec<Bin> = Vec::new();
    for i in 0..items.len() {
        greedy_insert(&mut bins, items, i, capacity, &mut seq);
    }

    let mut rounds = 0;
    while bins.len() > 1 {
        let attempt = shrink_once(&bins, items, capacity, &mut seq, &mut rounds)?;
        match attempt {
            Some(smaller) => bins = smaller,
            None => break,
        }
    }
    Ok(bins)
}

/// Place item `i` into the fitting bin sharing the most tiles (ties go to
/// the lowest-numbered bin), or open a new bin.
fn greedy_insert(bins: &mut Vec<Bin>, items: &[Item], i: usize, capacity: usize, seq: &mut usize) {
    let tiles = &items[i].tiles;
    let mut best: Option<(usize, usize)> = None;
    for (b, bin) in bins.iter().enumerate() {
        if !bin.would_hold(tiles, capacity) {
            continue;
        }
        let shared = bin.shared(tiles);
        if best.map_or(true, |(s, _)| shared > s) {
            best = Some((shared, b));
        }
    }
    match best {
        Some((_, b)) => bins[b].insert(i, tiles, seq),
        None => {
            let mut bin = Bin::default();
            bin.insert(i, tiles, seq);
            bins.push(bin);
        }
    }
}

/// One elimination attempt: spill the smallest bin into the others past
/// capacity, then evict-and-reinsert until no bin is overloaded. Returns
/// the new layout only when it uses fewer bins.
fn shrink_once(
    bins: &[Bin],
    items: &[Item],
    capacity: usize,
    seq: &mut usize,
    rounds: &mut usize,
) -> Result<Option<Vec<Bin>>, PackError> {
    // Victim: fewest distinct tiles, ties to the highest index.
    let victim = (0..bins.len())
        .min_by_key(|&b| (bins[b].tiles.len(), std::cmp::Reverse(b)))
        .expect("shrink_once called with bins");
    let before = bins.len();

    let mut work: Vec<Bin> = bins.to_vec();
    let spilled = work.remove(victim);

    // Overload step: each displaced item goes to the bin sharing the most
    // tiles, one overloading item per bin per round.
    for &(item, _) in &spilled.items {
        let tiles = &items[item].tiles;
        let target = work
            .iter()
            .enumerate()
            .filter(|(_, bin)| bin.tiles.len() <= capacity)
            .max_by_key(|(b, bin)| (bin.shared(tiles), std::cmp::Reverse(*b)))
            .map(|(b, _)| b);
        match target {
            Some(b) => work[b].insert(item, tiles, seq),
            None => {
                let mut bin = Bin::default();
                bin.insert(item, tiles, seq);
                work.push(bin);
            }
        }
    }

    // Remove step: every overloaded bin evicts the member contributing the
    // most tiles nobody else in the bin needs; evictees re-enter greedily.
    loop {
        let overloaded: Vec<usize> =
            (0..work.len()).filter(|&b| work[b].tiles.len() > capacity).collect();
        if overloaded.is_empty() {
            break;
        }
        *rounds += 1;
        if *rounds > ITERATION_CAP {
            return Err(PackError::IterationCap);
        }
        let mut evicted = Vec::new();
        for b in overloaded {
            let pick = {
                let bin = &work[b];
                bin.items
                    .iter()
                    .enumerate()
                    .max_by_key(|(_, &(item, s))| (bin.unique_to(item, items), s))
                    .map(|(pos, _)| pos)
                    .expect("overloaded bin cannot be empty")
            };
            let (item, _) = work[b].items.remove(pick);
            work[b].rebuild_tiles(items);
            evicted.push(item);
        }
        for item in evicted {
            greedy_insert(&mut work, items, item, capacity, seq);
        }
        work.retain(|bin| !bin.items.is_empty());
    }

    if work.len() < before {
        Ok(Some(work))
    } else {
        Ok(None)
    }
}

/// Union-find over cel indices for the `related` closure. Cycles in the
/// declared pairs collapse into one set.
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect() }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Smaller root wins so group membership is declaration-stable.
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

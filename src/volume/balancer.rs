//! Read balancer: per-channel round robin over RW sub-channels,
//! with a bandwidth-aware spill so that, under skew, the least-busy RW
//! replica is preferred. Pure selection logic over a channel's own
//! sub-channel list; kept free of I/O so it is exercised directly by unit
//! tests.

use super::channel::BaseSubChannel;

/// Selects the next sub-channel to serve a read of `blocks` blocks. The
/// cursor always advances to the next RW sub-channel; it never stops on
/// one that isn't currently taking reads.
pub fn select_reader(
    subs: &mut [BaseSubChannel],
    cursor: &mut usize,
    bandwidth_max: &mut u64,
    blocks: u64,
) -> Option<usize> {
    if subs.is_empty() {
        return None;
    }
    let n = subs.len();

    // Two passes: first honours the bandwidth ceiling, second (triggered
    // when every RW candidate is at or above the ceiling) just takes the
    // next RW candidate so that round robin never starves under sustained
    // saturation.
    for relaxed in [false, true] {
        for _ in 0 .. n {
            *cursor = (*cursor + 1) % n;
            let sub = &subs[*cursor];
            if !sub.is_rw() {
                continue;
            }
            if relaxed || sub.bandwidth < *bandwidth_max {
                let idx = *cursor;
                apply_selection(subs, idx, bandwidth_max, blocks);
                return Some(idx);
            }
        }
    }
    None
}

fn apply_selection(
    subs: &mut [BaseSubChannel],
    idx: usize,
    bandwidth_max: &mut u64,
    blocks: u64,
) {
    let sub = &mut subs[idx];
    match sub.bandwidth.checked_add(blocks) {
        Some(v) => {
            sub.bandwidth = v;
            if v > *bandwidth_max {
                *bandwidth_max = v;
            }
        }
        None => {
            // Would overflow: reset every counter before recording this
            // selection.
            for s in subs.iter_mut() {
                s.bandwidth = 0;
            }
            subs[idx].bandwidth = blocks;
            *bandwidth_max = blocks;
        }
    }
}

//! Clock domains and the edge scheduler
//!
//! Time is counted in femtoseconds. Edge `n` of a domain running at `hz`
//! happens at `offset + n * 10^15 / hz`, computed exactly, so long runs do
//! not drift against each other. Simultaneous edges are taken in
//! [`Domain::ALL`] order.

use serde::Serialize;

use crate::config::ClockConfig;

/// Femtoseconds per second
pub const FS_PER_SECOND: u128 = 1_000_000_000_000_000;

/// The five clock domains of the fabric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Usb,
    Sync,
    Fast,
    Adat,
    Dac,
}

impl Domain {
    pub const ALL: [Domain; 5] = [Domain::Usb, Domain::Sync, Domain::Fast, Domain::Adat, Domain::Dac];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Domain::Usb => "usb",
            Domain::Sync => "sync",
            Domain::Fast => "fast",
            Domain::Adat => "adat",
            Domain::Dac => "dac",
        }
    }
}

#[derive(Debug, Clone)]
struct DomainClock {
    hz: u64,
    offset_fs: u128,
    cycles: u64,
    next_edge_fs: u128,
}

impl DomainClock {
    fn new(hz: u64, offset_fs: u128) -> Self {
        Self {
            hz,
            offset_fs,
            cycles: 0,
            next_edge_fs: offset_fs,
        }
    }

    fn edge_time(&self, n: u64) -> u128 {
        self.offset_fs + n as u128 * FS_PER_SECOND / self.hz as u128
    }
}

/// Discrete event scheduler over the five domains
#[derive(Debug, Clone)]
pub struct Scheduler {
    clocks: [DomainClock; 5],
    now_fs: u128,
}

impl Scheduler {
    /// Domains start with fixed, unrelated phase offsets
    pub fn new(config: &ClockConfig) -> Self {
        let hz = [config.usb_hz, config.sync_hz, config.fast_hz, config.adat_hz, config.dac_hz];
        let clocks = std::array::from_fn(|i| {
            let period = FS_PER_SECOND / hz[i].max(1) as u128;
            // prime divisors keep the start phases apart
            let offset = period * [3, 5, 7, 11, 13][i] / 17;
            DomainClock::new(hz[i].max(1), offset)
        });
        Self { clocks, now_fs: 0 }
    }

    /// Current simulated time
    pub fn now_fs(&self) -> u128 {
        self.now_fs
    }

    /// Edges of `domain` taken so far
    pub fn cycles(&self, domain: Domain) -> u64 {
        self.clocks[domain.index()].cycles
    }

    pub fn frequency(&self, domain: Domain) -> u64 {
        self.clocks[domain.index()].hz
    }

    /// Advance to the next clock edge and return its domain
    pub fn next_edge(&mut self) -> Domain {
        let mut next = Domain::Usb;
        for domain in Domain::ALL {
            if self.clocks[domain.index()].next_edge_fs < self.clocks[next.index()].next_edge_fs {
                next = domain;
            }
        }

        let clock = &mut self.clocks[next.index()];
        self.now_fs = clock.next_edge_fs;
        clock.cycles += 1;
        clock.next_edge_fs = clock.edge_time(clock.cycles);
        next
    }

    /// Level of `domain`'s clock at `t_fs`: high for the first half of
    /// each period following a rising edge.
    pub fn level(&self, domain: Domain, t_fs: u128) -> bool {
        let clock = &self.clocks[domain.index()];
        if t_fs < clock.offset_fs {
            return false;
        }
        let phase = ((t_fs - clock.offset_fs) * clock.hz as u128) % FS_PER_SECOND;
        phase < FS_PER_SECOND / 2
    }
}

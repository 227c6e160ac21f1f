//! Simulation driver
//!
//! Steps the [`Scheduler`] edge by edge and clocks the matching domain of
//! the [`AudioInterface`]. USB domain edges also run the host stand-ins:
//! the host drives the bus, the fabric answers, and the host takes the
//! answer before the next edge.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::clock::{Domain, Scheduler, FS_PER_SECOND};
use crate::config::InterfaceConfig;
use crate::constants::SAMPLE_RATE;
use crate::error::Result;
use crate::interface::{AudioInterface, Diagnostics, UsbPort};
use crate::peripheral::{HostStats, UsbHost, UsbHostSettings};

/// Snapshot of a running simulation
#[derive(Debug, Clone, Serialize)]
pub struct SimulationStats {
    pub elapsed_us: f64,
    pub cycles: BTreeMap<&'static str, u64>,
    pub usb1: HostStats,
    pub usb2: Option<HostStats>,
    pub fabric: Diagnostics,
}

/// A fabric, its hosts and a timeline
pub struct Simulation {
    scheduler: Scheduler,
    interface: AudioInterface,
    usb1: UsbHost,
    usb2: Option<UsbHost>,
}

impl Simulation {
    pub fn new(config: &InterfaceConfig) -> Result<Self> {
        let interface = AudioInterface::new(config)?;
        Ok(Self::with_interface(config, interface))
    }

    /// Drive an already built fabric, e.g. one with custom sample sources
    pub fn with_interface(config: &InterfaceConfig, interface: AudioInterface) -> Self {
        let host = &config.host;
        let usb1 = UsbHost::new(UsbHostSettings {
            speed: config.feedback.speed,
            sof_interval: config.sof_interval_cycles(),
            channels: config.channels.usb1_channels() as u8,
            out_alt_setting: host.out_alt_setting,
            in_alt_setting: host.in_alt_setting,
            start_delay_sofs: host.start_delay_sofs,
            sample_rate: SAMPLE_RATE,
            record_in: host.record_in,
        });
        let usb2 = config.channels.dual_device.then(|| {
            UsbHost::new(UsbHostSettings {
                speed: config.feedback.speed,
                sof_interval: config.sof_interval_cycles(),
                channels: config.channels.usb2_channels as u8,
                out_alt_setting: host.usb2_alt_setting,
                in_alt_setting: host.usb2_alt_setting,
                start_delay_sofs: host.start_delay_sofs,
                sample_rate: SAMPLE_RATE,
                record_in: host.record_in,
            })
        });

        Self {
            scheduler: Scheduler::new(&config.clocks),
            interface,
            usb1,
            usb2,
        }
    }

    pub fn interface(&self) -> &AudioInterface {
        &self.interface
    }

    pub fn interface_mut(&mut self) -> &mut AudioInterface {
        &mut self.interface
    }

    pub fn host(&self) -> &UsbHost {
        &self.usb1
    }

    pub fn host_mut(&mut self) -> &mut UsbHost {
        &mut self.usb1
    }

    pub fn second_host(&self) -> Option<&UsbHost> {
        self.usb2.as_ref()
    }

    pub fn second_host_mut(&mut self) -> Option<&mut UsbHost> {
        self.usb2.as_mut()
    }

    /// Simulated time in femtoseconds
    pub fn now_fs(&self) -> u128 {
        self.scheduler.now_fs()
    }

    pub fn cycles(&self, domain: Domain) -> u64 {
        self.scheduler.cycles(domain)
    }

    /// Advance by one clock edge
    pub fn step(&mut self) -> Domain {
        let domain = self.scheduler.next_edge();
        match domain {
            Domain::Usb => self.usb_edge(),
            Domain::Sync => self.interface.clock_sync(),
            Domain::Fast => self.interface.clock_fast(),
            Domain::Adat => self.interface.clock_adat(),
            Domain::Dac => self.interface.clock_dac(),
        }
        domain
    }

    fn usb_edge(&mut self) {
        let adat_clock = self.scheduler.level(Domain::Adat, self.scheduler.now_fs());

        let bus1 = self.usb1.begin_cycle();
        let bus2 = self.usb2.as_mut().map(UsbHost::begin_cycle);

        let port1 = UsbPort {
            bus: &bus1,
            out_channels: self.usb1.out_channels(),
            in_channels: self.usb1.in_channels(),
        };
        let port2 = match (&self.usb2, &bus2) {
            (Some(host), Some(bus)) => Some(UsbPort {
                bus,
                out_channels: host.out_channels(),
                in_channels: host.in_channels(),
            }),
            _ => None,
        };

        let responses = self.interface.clock_usb(adat_clock, port1, port2);

        self.usb1.end_cycle(&bus1, responses.usb1);
        if let (Some(host), Some(bus), Some(response)) = (self.usb2.as_mut(), bus2.as_ref(), responses.usb2) {
            host.end_cycle(bus, response);
        }
    }

    /// Run until the timeline reaches `t_fs`
    pub fn run_until(&mut self, t_fs: u128) {
        while self.scheduler.now_fs() < t_fs {
            self.step();
        }
    }

    /// Run for `duration_us` microseconds of simulated time
    pub fn run_for_us(&mut self, duration_us: u64) {
        let end = self.now_fs() + duration_us as u128 * FS_PER_SECOND / 1_000_000;
        self.run_until(end);
    }

    pub fn stats(&self) -> SimulationStats {
        SimulationStats {
            elapsed_us: self.now_fs() as f64 / 1e9,
            cycles: Domain::ALL
                .iter()
                .map(|&d| (d.name(), self.scheduler.cycles(d)))
                .collect(),
            usb1: self.usb1.stats(),
            usb2: self.usb2.as_ref().map(UsbHost::stats),
            fabric: self.interface.diagnostics(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_every_domain() {
        let mut sim = Simulation::new(&InterfaceConfig::default()).unwrap();
        sim.run_for_us(10);
        for domain in Domain::ALL {
            assert!(sim.cycles(domain) > 0, "{} never clocked", domain.name());
        }
        let stats = sim.stats();
        assert!(stats.elapsed_us >= 10.0);
        assert_eq!(stats.cycles["usb"], sim.cycles(Domain::Usb));
    }
}

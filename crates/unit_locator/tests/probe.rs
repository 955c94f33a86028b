//! Host simulation of a full launch: every group gets the registers of the unit it is
//! placed on, and every thread of every group runs the probe.

use std::cell::{Cell, RefCell};

use unit_locator::{
    ArchFamily, BUFFER_LEN, CycleCounter, GROUP_COUNT, GROUP_SIZE, ITERATIONS, LeaderClaim,
    ProbeTarget, RegisterLayout, RegisterLocator, RegisterSnapshot, SampleSink, StructuralClaim,
    UnitProbe,
};

/// Shared counter advancing by a fixed step per read, standing in for a cycle counter.
struct Counter<'a> {
    now: &'a Cell<u64>,
    step: u64,
}

impl CycleCounter for Counter<'_> {
    fn now(&self) -> u64 {
        let now = self.now.get();
        self.now.set(now + self.step);
        now
    }
}

/// Host analogue of the device compare-and-swap claim.
#[derive(Default)]
struct FirstClaim {
    taken: Cell<bool>,
}

impl LeaderClaim for FirstClaim {
    fn try_claim(&self) -> bool {
        !self.taken.replace(true)
    }
}

/// Collects samples as the printed lines the device would produce.
struct Lines<'a>(&'a RefCell<Vec<String>>);

impl SampleSink for Lines<'_> {
    fn record(&mut self, _iteration: usize, latency: u64) {
        self.0.borrow_mut().push(latency.to_string());
    }
}

struct Launch {
    lines: Vec<String>,
    a0: Vec<u32>,
    writers: usize,
}

/// Runs `GROUP_COUNT` groups of `GROUP_SIZE` threads; group `g` sits on `placement(g)`.
fn launch<K: LeaderClaim>(
    layout: &'static RegisterLayout,
    placement: impl Fn(u32) -> u32,
    target: ProbeTarget,
    claim: &K,
) -> Launch {
    let staging: Vec<u32> = (0..BUFFER_LEN as u32).collect();
    let mut a0 = staging.clone();
    // a1[0] is 0 on device, which leaves A0 unchanged; make the write observable here
    let mut a1 = staging;
    a1[0] = 1;
    let lines = RefCell::new(Vec::new());
    let clock = Cell::new(1_000);
    let mut writers = 0;

    for group in 0..GROUP_COUNT {
        // every thread of a group shares its group's locator
        let registers = RegisterSnapshot::from_unit_id(layout, placement(group));
        let locator = RegisterLocator::new(layout, registers);
        assert_eq!(locator.layout(), layout);
        for local in 0..GROUP_SIZE {
            let counter = Counter {
                now: &clock,
                step: 300 + u64::from(group),
            };
            let probe = UnitProbe::new(&locator, counter, target);
            let mut sink = Lines(&lines);
            if unsafe { probe.run(local, claim, a0.as_mut_ptr(), a1.as_ptr(), &mut sink) } {
                writers += 1;
            }
        }
    }

    Launch {
        lines: lines.into_inner(),
        a0,
        writers,
    }
}

fn modified(a0: &[u32]) -> Vec<usize> {
    a0.iter()
        .enumerate()
        .filter(|&(i, &v)| v != i as u32)
        .map(|(i, _)| i)
        .collect()
}

#[test]
fn present_unit_emits_exactly_five_lines() {
    let layout = ArchFamily::Cdna.layout();
    let target = ProbeTarget::from_start_unit(0, 0).unwrap();
    let run = launch(layout, |group| group, target, &FirstClaim::default());

    assert_eq!(run.lines.len(), ITERATIONS);
    assert!(run.lines.iter().all(|line| line.parse::<u64>().is_ok()));
    assert_eq!(run.writers, 1);
    assert_eq!(modified(&run.a0), vec![0]);
}

#[test]
fn samples_come_from_the_target_group_in_order() {
    let layout = ArchFamily::Gfx11 { cu_mode: false }.layout();
    let unit = layout.pack(&[2, 1, 5]).unwrap();
    let target = ProbeTarget::from_start_unit(4, unit).unwrap();
    let run = launch(layout, |group| group, target, &StructuralClaim);

    // group `unit` advances the counter by 300 + unit per read
    let expected = (300 + u64::from(unit)).to_string();
    assert_eq!(run.lines, vec![expected; ITERATIONS]);
    assert_eq!(modified(&run.a0), vec![256]);
    assert_eq!(run.a0[256], 256 + ITERATIONS as u32);
}

#[test]
fn absent_unit_emits_nothing() {
    let layout = ArchFamily::Gfx9.layout();
    let target = ProbeTarget::from_start_unit(0, layout.max_unit_id() + 1).unwrap();
    let units = layout.max_unit_id() + 1;
    let run = launch(layout, |group| group % units, target, &FirstClaim::default());

    assert!(run.lines.is_empty());
    assert_eq!(run.writers, 0);
    assert!(modified(&run.a0).is_empty());
}

#[test]
fn last_legal_start_index_is_written_in_bounds() {
    let layout = ArchFamily::Nvptx.layout();
    let start_unit = (BUFFER_LEN as u32 - 1) / GROUP_SIZE;
    let target = ProbeTarget::from_start_unit(start_unit, 17).unwrap();
    let run = launch(layout, |group| group, target, &FirstClaim::default());

    assert_eq!(run.lines.len(), ITERATIONS);
    assert_eq!(modified(&run.a0), vec![target.start_index as usize]);
}

#[test]
fn claim_keeps_a_single_writer_when_groups_share_a_unit() {
    // 120 groups on 40 units: three groups per unit
    let layout = ArchFamily::Cdna3.layout();
    let placement = |group: u32| group % 40;

    let claimed = launch(layout, placement, ProbeTarget::new(0, 7), &FirstClaim::default());
    assert_eq!(claimed.writers, 1);
    assert_eq!(claimed.lines.len(), ITERATIONS);
    assert_eq!(claimed.a0[0], ITERATIONS as u32);

    let unclaimed = launch(layout, placement, ProbeTarget::new(0, 7), &StructuralClaim);
    assert_eq!(unclaimed.writers, 3);
    assert_eq!(unclaimed.lines.len(), 3 * ITERATIONS);
}

// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Behaviour of the host machine itself: exits, panics and runaway programs.

use exo_e2e::{Failure, Machine};
use exo_user::console::{cputs, print};
use exo_user::{fork, sys, this_env, wait, Forked};
use exokern::KernelConfig;

#[test]
fn returning_from_a_program_exits_the_environment() {
    let mut machine = Machine::new(KernelConfig::DEFAULT);
    let id = machine.spawn(|p| cputs(p, "bye\n"));

    let report = machine.run().expect("run");
    assert_eq!(report.output, "bye\n");
    assert!(report.blocked.is_empty());
    assert!(machine.kernel().inspect(|state| state.envs().get(id).is_none()));
}

#[test]
fn program_panics_surface_as_failures() {
    let mut machine = Machine::new(KernelConfig::DEFAULT);
    let id = machine.spawn(|_| panic!("boom"));

    let err = machine.run().expect_err("panic");
    assert_eq!(err, Failure::Panicked { env: id, message: String::from("boom") });
}

#[test]
fn spinning_programs_hit_the_step_limit() {
    let mut machine = Machine::new(KernelConfig::DEFAULT).with_step_limit(100);
    machine.spawn(|p| loop {
        sys::yield_(p);
    });

    assert_eq!(machine.run().expect_err("spin"), Failure::StepLimit(101));
}

#[test]
fn environments_take_turns_when_yielding() {
    let mut machine = Machine::new(KernelConfig::DEFAULT);
    for _ in 0..2 {
        machine.spawn(|p| {
            for round in 0..3 {
                let id = this_env(p);
                print(p, format_args!("{} {}\n", id.index(), round));
                sys::yield_(p);
            }
        });
    }

    let report = machine.run().expect("run");
    assert_eq!(report.output, "0 0\n1 0\n0 1\n1 1\n0 2\n1 2\n");
}

#[test]
fn parent_waits_for_every_child() {
    let mut machine = Machine::new(KernelConfig::DEFAULT);
    machine.spawn(|p| {
        let mut children = Vec::new();
        for n in 0..3u32 {
            match fork(p).expect("fork") {
                Forked::Child => {
                    for _ in 0..n {
                        sys::yield_(p);
                    }
                    print(p, format_args!("child {}\n", n));
                    return;
                }
                Forked::Parent(child) => children.push(child),
            }
        }
        for child in children {
            wait(p, child);
        }
        cputs(p, "all done\n");
    });

    let report = machine.run().expect("run");
    let lines: Vec<&str> = report.output.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[3], "all done");
}

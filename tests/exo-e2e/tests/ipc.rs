// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Message passing between forked environments.

use exo_abi::env::EnvId;
use exo_e2e::{alloc_page, Machine, URW};
use exo_user::console::{cputs, print};
use exo_user::{fork, ipc_recv, ipc_send, Forked, Platform};
use exokern::{IpcConfig, IpcMode, KernelConfig};

const SEND_VA: u32 = 0x00a0_0000;
const RECV_VA: u32 = 0x00b0_0000;

fn pingpong(p: &mut dyn Platform) {
    let who = match fork(p).expect("fork") {
        Forked::Parent(child) => {
            ipc_send(p, child, 0, None).expect("kickoff");
            "parent"
        }
        Forked::Child => "child",
    };
    loop {
        let msg = ipc_recv(p, None).expect("recv");
        print(p, format_args!("{} got {}\n", who, msg.value));
        if msg.value == 10 {
            return;
        }
        ipc_send(p, msg.from, msg.value + 1, None).expect("send");
        if msg.value + 1 == 10 {
            return;
        }
    }
}

fn expected_volley() -> String {
    (0..=10)
        .map(|i| format!("{} got {}\n", if i % 2 == 0 { "child" } else { "parent" }, i))
        .collect()
}

#[test]
fn pingpong_with_queued_senders() {
    let mut machine = Machine::new(KernelConfig::DEFAULT);
    machine.spawn(pingpong);
    let report = machine.run().expect("run");
    assert_eq!(report.output, expected_volley());
    assert!(report.blocked.is_empty());
}

#[test]
fn pingpong_with_retrying_senders() {
    let ipc = IpcConfig { mode: IpcMode::Unqueued, ..IpcConfig::DEFAULT };
    let mut machine = Machine::new(KernelConfig { ipc, ..KernelConfig::DEFAULT });
    machine.spawn(pingpong);
    let report = machine.run().expect("run");
    assert_eq!(report.output, expected_volley());
}

#[test]
fn transferred_page_is_shared() {
    let mut machine = Machine::new(KernelConfig::DEFAULT);
    machine.spawn(|p| match fork(p).expect("fork") {
        Forked::Child => {
            let msg = ipc_recv(p, Some(RECV_VA)).expect("recv");
            assert_eq!(msg.perm, URW);
            let mut buf = [0u8; 4];
            p.read(RECV_VA, &mut buf);
            assert_eq!(&buf, b"ping");
            p.write(RECV_VA, b"pong");
            ipc_send(p, msg.from, 1, None).expect("reply");
        }
        Forked::Parent(child) => {
            alloc_page(p, SEND_VA);
            p.write(SEND_VA, b"ping");
            ipc_send(p, child, 0, Some((SEND_VA, URW))).expect("send");
            let msg = ipc_recv(p, None).expect("recv");
            assert_eq!(msg.from, child);
            let mut buf = [0u8; 4];
            p.read(SEND_VA, &mut buf);
            assert_eq!(&buf, b"pong");
            cputs(p, "shared\n");
        }
    });

    let report = machine.run().expect("run");
    assert_eq!(report.output, "shared\n");
}

#[test]
fn lonely_receiver_leaves_the_cpu_halted() {
    let mut machine = Machine::new(KernelConfig::DEFAULT);
    let id = machine.spawn(|p| {
        let _ = ipc_recv(p, None);
        cputs(p, "unreachable\n");
    });

    let report = machine.run().expect("run");
    assert_eq!(report.blocked, vec![id]);
    assert!(report.output.is_empty());
    assert!(machine.kernel().inspect(|state| state.cpu(exokern::CpuId::BOOT).halted));
}

#[test]
fn sending_to_a_dead_peer_reports_bad_env() {
    let mut machine = Machine::new(KernelConfig::DEFAULT);
    machine.spawn(|p| {
        let bogus = EnvId::from_raw(0x7fff_f3ff);
        match ipc_send(p, bogus, 1, None) {
            Err(err) => print(p, format_args!("send: {}\n", err)),
            Ok(()) => cputs(p, "delivered\n"),
        }
    });

    let report = machine.run().expect("run");
    assert_eq!(report.output, "send: bad environment\n");
}

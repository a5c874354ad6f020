mod common;

use std::{sync::Arc, thread, time::Duration};

use anyhow::Result;
use common::*;
use homewire_proto::{FrameKind, Packet};
use homewire_queue::{
    Direction, DispatchFlags, LastAction, MessageTemplate, OutboundQueue, QueueKind, ResetAction,
};

const PEER: u32 = 0x001A_2B3C;

#[test]
fn answered_request_is_sent_once_and_fires_its_callback() -> Result<()> {
    init_tracing();
    let (transport, rx) = RecordingTransport::new(TRANSPORT_ID);
    let peer = Arc::new(PeerRecorder::default());
    let queue = OutboundQueue::new(
        links(transport).with_peer(peer.clone()),
        QueueKind::Peer,
        1,
        fast_config(),
    );
    queue.set_drain_callback(Some(ResetAction::ScheduleValueReset {
        channel: 1,
        key: "STATE".into(),
        reset_value: 0,
        reset_at_secs: 1_700_000_000,
    }));

    let request = frame(PEER, &[0x01, 0x02]);
    queue.push_packet(request.clone(), RESEND, false, false);
    assert_eq!(recv(&rx, RECV_TIMEOUT), Some(request.to_wire()));

    // The answer arrived.
    queue.pop();
    queue.pop();

    assert!(drain_for(&rx, Duration::from_millis(250)).is_empty());
    assert!(queue.is_empty());
    assert_eq!(queue.armed_resend_timers(), 0);

    let resets = peer.resets.lock();
    assert_eq!(resets.len(), 1);
    assert_eq!(resets[0].key, "STATE");
    assert_eq!(resets[0].reset_at_secs, 1_700_000_000);
    Ok(())
}

#[test]
fn unanswered_request_is_resent_until_the_limit() -> Result<()> {
    init_tracing();
    let (transport, rx) = RecordingTransport::new(TRANSPORT_ID);
    let queue = OutboundQueue::new(links(transport), QueueKind::Peer, 1, fast_config());
    assert_eq!(queue.retries(), 4);

    let request = frame(PEER, &[0x11]);
    queue.push_packet(request.clone(), RESEND, false, false);

    let sent = drain_for(&rx, Duration::from_millis(600));
    assert_eq!(sent.len(), 3, "one send and two resends");
    assert!(sent.iter().all(|wire| *wire == request.to_wire()));

    assert_eq!(queue.resend_counter(), 0);
    assert_eq!(queue.armed_resend_timers(), 0);
    // The entry stays until someone pops it.
    assert_eq!(queue.len(), 1);
    Ok(())
}

#[test]
fn frames_without_resend_flag_are_sent_once() -> Result<()> {
    let (transport, rx) = RecordingTransport::new(TRANSPORT_ID);
    let queue = OutboundQueue::new(links(transport), QueueKind::Peer, 1, fast_config());

    queue.push_packet(frame(PEER, &[]), ONCE, false, false);
    assert!(recv(&rx, RECV_TIMEOUT).is_some());
    queue.pop();
    // Same exchange answers; no timer either.
    queue.push_packet(frame(PEER, &[]), RESEND | DispatchFlags::RESPONSE_EXPECTED, false, false);
    assert!(recv(&rx, RECV_TIMEOUT).is_some());

    assert!(drain_for(&rx, Duration::from_millis(300)).is_empty());
    assert_eq!(queue.armed_resend_timers(), 0);
    Ok(())
}

#[test]
fn auto_resend_transport_gets_no_timer() -> Result<()> {
    let (transport, rx) = RecordingTransport::with_auto_resend(TRANSPORT_ID, true);
    let queue = OutboundQueue::new(links(transport), QueueKind::Peer, 1, fast_config());

    queue.push_packet(frame(PEER, &[]), RESEND, false, false);

    assert_eq!(drain_for(&rx, Duration::from_millis(300)).len(), 1);
    assert_eq!(queue.armed_resend_timers(), 0);
    Ok(())
}

#[test]
fn forced_resend_ignores_the_dispatch_flags() -> Result<()> {
    let (transport, rx) = RecordingTransport::new(TRANSPORT_ID);
    let queue = OutboundQueue::new(links(transport), QueueKind::Peer, 1, fast_config());
    queue.set_retries(3);

    queue.push_packet(frame(PEER, &[]), DispatchFlags::RESPONSE_EXPECTED, false, true);

    // retries 3 leaves room for one resend
    assert_eq!(drain_for(&rx, Duration::from_millis(400)).len(), 2);
    Ok(())
}

#[test]
fn outgoing_entry_behind_an_expected_answer_is_sent() -> Result<()> {
    let (transport, rx) = RecordingTransport::new(TRANSPORT_ID);
    let queue = OutboundQueue::new(links(transport), QueueKind::Peer, 1, fast_config());

    let expected = Arc::new(MessageTemplate::new(Direction::Incoming, 0x02, ONCE));
    queue.push_message(expected, false);
    assert_eq!(queue.len(), 1);
    assert!(recv(&rx, Duration::from_millis(100)).is_none());

    let request = frame(PEER, &[0x05]);
    queue.push_packet(request.clone(), ONCE, false, false);
    assert_eq!(queue.len(), 2);
    assert_eq!(recv(&rx, RECV_TIMEOUT), Some(request.to_wire()));

    // A third entry waits its turn.
    queue.push_packet(frame(PEER, &[0x06]), ONCE, false, false);
    assert!(recv(&rx, Duration::from_millis(100)).is_none());
    assert_eq!(queue.len(), 3);
    Ok(())
}

#[test]
fn outgoing_messages_go_through_the_handler() -> Result<()> {
    let (transport, rx) = RecordingTransport::new(TRANSPORT_ID);
    let (handler, calls) = RecordingHandler::new();
    let queue = OutboundQueue::new(
        links(transport).with_handler(handler),
        QueueKind::Peer,
        1,
        fast_config(),
    );

    let message =
        Arc::new(MessageTemplate::new(Direction::Outgoing, 0x11, ONCE).with_subtype(9, 0x02));
    let trigger = frame(PEER, &[0x02]);
    queue.push_outgoing(message, trigger.clone(), false);

    let (message_type, packet) = calls.recv_timeout(RECV_TIMEOUT)?;
    assert_eq!(message_type, 0x11);
    assert_eq!(packet, Some(trigger.to_wire()));
    assert!(recv(&rx, Duration::from_millis(50)).is_none());
    Ok(())
}

#[test]
fn push_front_keeps_a_single_resend_timer() -> Result<()> {
    let (transport, _rx) = RecordingTransport::new(TRANSPORT_ID);
    let queue = OutboundQueue::new(links(transport), QueueKind::Peer, 1, fast_config());

    queue.push_packet(frame(PEER, &[0x01]), RESEND, false, false);
    queue.push_front(frame(PEER, &[0x02]), RESEND, false, false, false);
    queue.push_front(frame(PEER, &[0x03]), RESEND, false, true, false);
    assert_eq!(queue.len(), 2);

    for _ in 0..50 {
        assert!(queue.armed_resend_timers() <= 1);
        thread::sleep(Duration::from_millis(5));
    }
    let front = queue.front().and_then(|e| e.packet_ref().map(|p| p.payload().to_vec()));
    assert_eq!(front, Some(vec![0x03]));

    queue.clear();
    assert_eq!(queue.armed_resend_timers(), 0);
    Ok(())
}

#[test]
fn pop_wait_moves_on_after_the_timeout() -> Result<()> {
    let (transport, rx) = RecordingTransport::new(TRANSPORT_ID);
    let queue = OutboundQueue::new(links(transport), QueueKind::Peer, 1, fast_config());

    let first = frame(PEER, &[0x01]);
    let second = frame(PEER, &[0x02]);
    queue.push_packet(first.clone(), ONCE, false, false);
    queue.push_packet(second.clone(), ONCE, false, false);
    assert_eq!(recv(&rx, RECV_TIMEOUT), Some(first.to_wire()));

    queue.pop_wait(Duration::from_millis(20));
    assert_eq!(recv(&rx, RECV_TIMEOUT), Some(second.to_wire()));
    assert_eq!(queue.len(), 1);
    Ok(())
}

#[test]
fn stopped_pop_wait_does_not_pop() -> Result<()> {
    let (transport, _rx) = RecordingTransport::new(TRANSPORT_ID);
    let queue = OutboundQueue::new(links(transport), QueueKind::Peer, 1, fast_config());

    queue.push_packet(frame(PEER, &[0x01]), ONCE, false, false);
    queue.push_packet(frame(PEER, &[0x02]), ONCE, false, false);
    queue.pop_wait(Duration::from_millis(100));
    // A real pop cancels the pending one.
    queue.pop();
    thread::sleep(Duration::from_millis(250));
    assert_eq!(queue.len(), 1);
    Ok(())
}

#[test]
fn pending_queues_are_spliced_in_order() -> Result<()> {
    init_tracing();
    let (transport, rx) = RecordingTransport::new(TRANSPORT_ID);
    let service = Arc::new(ServiceRecorder::default());
    let links = links(transport).with_service(service.clone());
    let active = OutboundQueue::new(links.clone(), QueueKind::Peer, 1, fast_config());

    let first = frame(PEER, &[0xA1]);
    let second = frame(PEER, &[0xB1]);

    let plain = OutboundQueue::pending(links.clone(), QueueKind::Default, fast_config());
    plain.push_packet(first.clone(), ONCE, false, false);
    let config = OutboundQueue::pending(links, QueueKind::Config, fast_config());
    config.push_packet(second.clone(), ONCE, false, false);
    assert!(recv(&rx, Duration::from_millis(50)).is_none());

    active.push_pending(plain, false, false);
    assert_eq!(recv(&rx, RECV_TIMEOUT), Some(first.to_wire()));
    active.push_pending(config, false, false);
    assert_eq!(active.pending_queues().map(|p| p.len()), Some(2));

    active.pop();
    assert_eq!(recv(&rx, RECV_TIMEOUT), Some(second.to_wire()));
    assert_eq!(active.kind(), QueueKind::Config);
    assert!(service.config_pending.lock().is_empty());

    active.pop();
    assert!(active.is_empty());
    assert_eq!(*service.config_pending.lock(), vec![false]);
    Ok(())
}

#[test]
fn pop_immediately_releases_the_spliced_queue() -> Result<()> {
    let (transport, rx) = RecordingTransport::new(TRANSPORT_ID);
    let active = OutboundQueue::new(links(transport.clone()), QueueKind::Peer, 1, fast_config());

    let pending = OutboundQueue::pending(links(transport), QueueKind::Default, fast_config());
    pending.push_packet(frame(PEER, &[0x01]), ONCE, false, false);
    active.push_pending(pending, true, false);

    assert!(recv(&rx, RECV_TIMEOUT).is_some());
    assert_eq!(active.pending_queues().map(|p| p.len()), Some(0));
    assert_eq!(active.len(), 1);
    Ok(())
}

#[test]
fn no_sending_queue_only_collects() -> Result<()> {
    let (transport, rx) = RecordingTransport::new(TRANSPORT_ID);
    let queue = OutboundQueue::pending(links(transport), QueueKind::Config, fast_config());

    queue.push_packet(frame(PEER, &[]), RESEND, false, false);
    queue.push_front(frame(PEER, &[]), RESEND, false, false, false);

    assert!(drain_for(&rx, Duration::from_millis(200)).is_empty());
    assert_eq!(queue.len(), 2);
    assert_eq!(queue.armed_resend_timers(), 0);
    Ok(())
}

#[test]
fn wake_on_radio_bursts_the_next_send_only() -> Result<()> {
    let (transport, rx) = RecordingTransport::new(TRANSPORT_ID);
    let queue = OutboundQueue::new(links(transport.clone()), QueueKind::Peer, 1, fast_config());

    let request = frame(PEER, &[]);
    queue.set_wake_on_radio_bit();
    queue.push_packet(request.clone(), ONCE, false, false);
    // The frame itself is untouched; only the send mode changes.
    assert_eq!(recv(&rx, RECV_TIMEOUT), Some(request.to_wire()));

    queue.pop();
    queue.push_packet(request.clone(), ONCE, false, false);
    assert_eq!(recv(&rx, RECV_TIMEOUT), Some(request.to_wire()));
    assert_eq!(*transport.bursts.lock(), vec![true, false]);
    Ok(())
}

#[test]
fn burst_entries_are_sent_in_burst_mode() -> Result<()> {
    let (transport, rx) = RecordingTransport::new(TRANSPORT_ID);
    let queue = OutboundQueue::new(links(transport.clone()), QueueKind::Peer, 1, fast_config());

    queue.push_packet(frame(PEER, &[0x01]), ONCE | DispatchFlags::BURST, false, false);
    assert!(recv(&rx, RECV_TIMEOUT).is_some());
    queue.pop();
    queue.push_packet(frame(PEER, &[0x02]), ONCE, false, false);
    assert!(recv(&rx, RECV_TIMEOUT).is_some());
    assert_eq!(*transport.bursts.lock(), vec![true, false]);
    Ok(())
}

#[test]
fn generated_counters_do_not_change_the_resend_policy() -> Result<()> {
    // Counter and F bits of a generated control byte mean nothing to the queue.
    for receiver_counter in 0..4 {
        let packet = Packet::builder(FrameKind::Data)
            .destination(PEER)
            .sender(0x00FD_0001)
            .receiver_counter(receiver_counter)
            .payload(vec![0x01])
            .build()?;

        let (transport, rx) = RecordingTransport::new(TRANSPORT_ID);
        let queue = OutboundQueue::new(links(transport.clone()), QueueKind::Peer, 1, fast_config());
        queue.push_packet(packet.clone(), ONCE, false, false);
        let sent = drain_for(&rx, Duration::from_millis(300));
        assert_eq!(sent, vec![packet.to_wire()], "receiver counter {receiver_counter}");
        queue.dispose();

        let (resending, rx) = RecordingTransport::new(TRANSPORT_ID);
        let queue = OutboundQueue::new(links(resending.clone()), QueueKind::Peer, 2, fast_config());
        queue.push_packet(packet.clone(), RESEND, false, false);
        let sent = drain_for(&rx, Duration::from_millis(600));
        assert_eq!(sent.len(), 3, "receiver counter {receiver_counter}");
        queue.dispose();

        assert!(transport.bursts.lock().iter().all(|burst| !burst));
        assert!(resending.bursts.lock().iter().all(|burst| !burst));
    }
    Ok(())
}

#[test]
fn disposed_queue_ignores_everything() -> Result<()> {
    let (transport, rx) = RecordingTransport::new(TRANSPORT_ID);
    let queue = OutboundQueue::new(links(transport), QueueKind::Peer, 1, fast_config());

    queue.push_packet(frame(PEER, &[]), RESEND, false, false);
    assert!(recv(&rx, RECV_TIMEOUT).is_some());
    queue.dispose();
    assert!(queue.is_disposing());
    assert_eq!(queue.armed_resend_timers(), 0);

    queue.push_packet(frame(PEER, &[]), RESEND, false, false);
    queue.pop();
    assert!(drain_for(&rx, Duration::from_millis(200)).is_empty());
    assert_eq!(queue.len(), 0);
    Ok(())
}

#[test]
fn keep_alive_stamps_the_shared_clock() -> Result<()> {
    let (transport, _rx) = RecordingTransport::new(TRANSPORT_ID);
    let last_action = LastAction::default();
    let queue = OutboundQueue::new(
        links(transport).with_last_action(last_action.clone()),
        QueueKind::Peer,
        1,
        fast_config(),
    );

    queue.keep_alive();
    let touched = last_action.millis();
    assert!(touched > 0);

    queue.long_keep_alive();
    assert!(last_action.millis() >= touched + 4_000);
    Ok(())
}

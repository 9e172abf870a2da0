//! End-to-end driver tests over the loopback transport pair.
//!
//! Each test plays the controller: a responder thread captures the driver's
//! output reports and injects the input reports a real Joy-Con would send
//! back, exercising the full path through the façade, the driver core and
//! the session engine.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use joycon_driver::mcu::{IrResolution, McuMode};
use joycon_driver::protocol::crc8;
use joycon_driver::session::{
    loopback_pair, SessionError, INPUT_REPORT_EXT_LEN, INPUT_REPORT_LEN,
};
use joycon_driver::types::{Button, Stick};
use joycon_driver::{
    open, Category, Controller, ControllerData, Error, JoyConDual, JoyConL, JoyConR, Player,
    PlayerFlash, ProController, RumbleData, RumbleDataF,
};

const WAIT: Duration = Duration::from_secs(2);
/// Margin between capturing an output and injecting its reply, so the
/// driver has queued its inspector by the time the reply arrives.
const REPLY_DELAY: Duration = Duration::from_millis(20);

fn subcmd_reply(id: u8) -> Vec<u8> {
    let mut raw = vec![0u8; 64];
    raw[0] = 0x21;
    raw[13] = 0x80;
    raw[14] = id;
    raw
}

fn flash_reply(address: u32, payload: &[u8]) -> Vec<u8> {
    let mut raw = subcmd_reply(0x10);
    raw[15..19].copy_from_slice(&address.to_le_bytes());
    raw[19] = payload.len() as u8;
    raw[20..20 + payload.len()].copy_from_slice(payload);
    raw
}

fn ir_fragment(frag: u8) -> Vec<u8> {
    let mut raw = vec![0u8; INPUT_REPORT_EXT_LEN];
    raw[0] = 0x31;
    raw[49] = 0x03;
    raw[52] = frag;
    for byte in &mut raw[59..359] {
        *byte = frag;
    }
    raw
}

/// An empty IR report (`ir[0] == 0xFF`).
fn ir_empty() -> Vec<u8> {
    let mut raw = vec![0u8; INPUT_REPORT_EXT_LEN];
    raw[0] = 0x31;
    raw[49] = 0xFF;
    raw
}

// ── Sub-command replay and timeout ──

#[test]
fn set_player_resolves_on_echo_reply() {
    let (transport, device) = loopback_pair(INPUT_REPORT_LEN);
    let pad = ProController::new(Box::new(transport));

    let responder = thread::spawn(move || {
        let out = device.next_output(WAIT).expect("no output captured");
        thread::sleep(REPLY_DELAY);
        device.inject(&subcmd_reply(0x30));
        out
    });

    pad.set_player(Player(0b0101), PlayerFlash(0b1010)).unwrap();
    let out = responder.join().unwrap();
    assert_eq!(out[0], 0x01);
    assert_eq!(out[10], 0x30);
    assert_eq!(out[11], 0xA5);
}

#[test]
fn set_player_times_out_without_matching_reply() {
    let (transport, device) = loopback_pair(INPUT_REPORT_LEN);
    let pad = ProController::new(Box::new(transport));

    let responder = thread::spawn(move || {
        let _ = device.next_output(WAIT).expect("no output captured");
        thread::sleep(REPLY_DELAY);
        // Standard reports, never the 0x21 reply the inspector wants.
        for _ in 0..11 {
            device.inject(&[0x30]);
        }
    });

    let err = pad
        .set_player(Player::lit(1), PlayerFlash::NONE)
        .unwrap_err();
    assert!(matches!(err, Error::Session(SessionError::TimedOut)));
    responder.join().unwrap();
}

// ── Flash memory ──

#[test]
fn backup_reads_first_window_and_reports_progress() {
    let (transport, device) = loopback_pair(INPUT_REPORT_LEN);
    let pad = ProController::new(Box::new(transport));

    let responder = thread::spawn(move || {
        let out = device.next_output(WAIT).expect("no flash read request");
        assert_eq!(out[10], 0x10);
        assert_eq!(out[11..15], 0u32.to_le_bytes());
        assert_eq!(out[15], 0x1D);
        thread::sleep(REPLY_DELAY);
        device.inject(&flash_reply(0, &[0xAA; 0x1D]));
    });

    let mut dst = [0u8; 0x1D];
    let mut calls = Vec::new();
    let read = pad
        .backup_memory(&mut dst, &mut |total, current| calls.push((total, current)))
        .unwrap();
    responder.join().unwrap();

    assert_eq!(read, 0x1D);
    assert!(dst.iter().all(|&b| b == 0xAA));
    assert_eq!(calls, vec![(0x80000, 0x1D)]);
}

#[test]
fn get_color_reads_the_color_record() {
    let (transport, device) = loopback_pair(INPUT_REPORT_LEN);
    let pad = ProController::new(Box::new(transport));

    let responder = thread::spawn(move || {
        let out = device.next_output(WAIT).expect("no flash read request");
        assert_eq!(out[10], 0x10);
        assert_eq!(out[11..15], 0x6050u32.to_le_bytes());
        assert_eq!(out[15], 13);
        thread::sleep(REPLY_DELAY);
        let payload = [
            0x82, 0x82, 0x82, 0x0F, 0x0F, 0x0F, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0xFF,
        ];
        device.inject(&flash_reply(0x6050, &payload));
    });

    let color = pad.get_color().unwrap();
    responder.join().unwrap();
    assert_eq!(color.body, [0x82, 0x82, 0x82]);
    assert_eq!(color.buttons, [0x0F, 0x0F, 0x0F]);
    assert_eq!(color.left_grip, [0x11, 0x22, 0x33]);
    assert_eq!(color.right_grip, [0x44, 0x55, 0x66]);
}

#[test]
fn flash_bounds_are_rejected_before_the_wire() {
    let (transport, device) = loopback_pair(INPUT_REPORT_LEN);
    let pad = ProController::new(Box::new(transport));
    let mut buf = [0u8; 32];
    assert!(matches!(
        pad.read_memory(0x80000, 1, &mut buf),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        pad.read_memory(0, 0x1E, &mut buf),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        pad.write_memory(0x7FFFF, &[0u8; 0x1E]),
        Err(Error::InvalidArgument(_))
    ));
    drop(pad);
    assert!(device.drain_outputs().is_empty());
}

// ── Rumble ──

#[test]
fn rumblef_produces_reference_wire_bytes() {
    let (transport, device) = loopback_pair(INPUT_REPORT_LEN);
    let pad = ProController::new(Box::new(transport));
    let request = RumbleDataF {
        freq_h: 320.0,
        freq_h_amp: 0.5,
        freq_l: 160.0,
        freq_l_amp: 0.5,
    };
    pad.rumblef(Some(&request), Some(&request)).unwrap();
    let out = device.next_output(WAIT).unwrap();
    assert_eq!(out[0], 0x10);
    assert_eq!(out[2..6], [0x00, 0x89, 0x40, 0x62]);
    assert_eq!(out[6..10], [0x00, 0x89, 0x40, 0x62]);
}

#[test]
fn rumblef_rejects_out_of_range_frequencies() {
    let (transport, device) = loopback_pair(INPUT_REPORT_LEN);
    let pad = ProController::new(Box::new(transport));
    let request = RumbleDataF {
        freq_h: 2000.0,
        freq_h_amp: 0.5,
        freq_l: 160.0,
        freq_l_amp: 0.5,
    };
    let err = pad.rumblef(Some(&request), None).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    drop(pad);
    assert!(device.drain_outputs().is_empty());
}

#[test]
fn left_joycon_forwards_only_the_left_slot() {
    let (transport, device) = loopback_pair(INPUT_REPORT_LEN);
    let joycon = JoyConL::new(Box::new(transport));
    let data = RumbleData::from_bytes([0x11, 0x22, 0x33, 0x44]);
    joycon.rumble(Some(&data), Some(&data)).unwrap();
    let out = device.next_output(WAIT).unwrap();
    assert_eq!(out[2..6], [0x11, 0x22, 0x33, 0x44]);
    assert_eq!(out[6..10], [0x00, 0x00, 0x00, 0x00]);
}

// ── Dual mode ──

#[test]
fn dual_mode_merges_both_halves() {
    let (left_transport, left_device) = loopback_pair(INPUT_REPORT_LEN);
    let (right_transport, right_device) = loopback_pair(INPUT_REPORT_LEN);
    let pair = JoyConDual::new(Box::new(left_transport), Box::new(right_transport));

    let left_injector = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        let mut raw = vec![0u8; 64];
        raw[0] = 0x30;
        raw[2] = 0x02; // category 1, left joy-con
        raw[5] = 0x40; // L
        raw[6..9].copy_from_slice(&Stick::from_axes(0x7FF, 0x800).0);
        left_device.inject(&raw);
    });
    let right_injector = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        let mut raw = vec![0u8; 64];
        raw[0] = 0x30;
        raw[2] = 0x04; // category 2, right joy-con
        raw[3] = 0x08; // A
        raw[9..12].copy_from_slice(&Stick::from_axes(0x123, 0xABC).0);
        right_device.inject(&raw);
    });

    let mut data = ControllerData::default();
    pair.get_data(&mut data).unwrap();
    left_injector.join().unwrap();
    right_injector.join().unwrap();

    assert!(data.buttons.pressed(Button::L));
    assert!(data.buttons.pressed(Button::A));
    assert_eq!(data.left_stick.x(), 0x7FF);
    assert_eq!(data.left_stick.y(), 0x800);
    assert_eq!(data.right_stick.x(), 0x123);
    assert_eq!(data.right_stick.y(), 0xABC);
}

// ── MCU ──

#[test]
fn set_mcu_mode_waits_for_the_standby_ack() {
    let (transport, device) = loopback_pair(INPUT_REPORT_LEN);
    let joycon = JoyConR::new(Box::new(transport));

    let responder = thread::spawn(move || {
        let out = device.next_output(WAIT).expect("no mcu command");
        assert_eq!(out[0], 0x01);
        assert_eq!(out[10], 0x21);
        assert_eq!(out[11], 0x21);
        assert_eq!(out[13], 0x05);
        assert_eq!(out[48], crc8(&out[12..48]));
        thread::sleep(REPLY_DELAY);
        let mut raw = subcmd_reply(0x21);
        raw[15] = 0x01;
        raw[22] = 0x01;
        device.inject(&raw);
    });

    joycon.set_mcu_mode(McuMode::Ir).unwrap();
    responder.join().unwrap();
}

#[test]
fn check_mcu_mode_reads_status_reports() {
    let (transport, device) = loopback_pair(INPUT_REPORT_LEN);
    let joycon = JoyConR::new(Box::new(transport));

    let responder = thread::spawn(move || {
        let out = device.next_output(WAIT).expect("no status request");
        assert_eq!(out[0], 0x11);
        assert_eq!(out[10], 0x01);
        thread::sleep(REPLY_DELAY);
        let mut raw = vec![0u8; 64];
        raw[0] = 0x31;
        raw[49] = 0x01;
        raw[56] = 0x01; // standby
        device.inject(&raw);
    });

    joycon.check_mcu_mode(McuMode::Standby).unwrap();
    responder.join().unwrap();
}

// ── IR streaming ──

#[test]
fn ir_stream_reassembles_one_frame() {
    let (transport, device) = loopback_pair(INPUT_REPORT_EXT_LEN);
    let joycon = JoyConR::new(Box::new(transport));
    let fixed = IrResolution::R30p.config();

    let responder = thread::spawn(move || {
        let request = device.next_output(WAIT).expect("no stream request");
        assert_eq!(request[0], 0x11);
        assert_eq!(request[10], 0x03);
        assert_eq!(request[11], 0x00);
        assert_eq!(request[48], 0xFF);
        thread::sleep(REPLY_DELAY);
        for frag in 0..=3u8 {
            device.inject(&ir_fragment(frag));
        }
        let mut acks = Vec::new();
        while let Some(out) = device.next_output(Duration::from_millis(300)) {
            acks.push(out[14]);
        }
        acks
    });

    let frames: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink_frames = Arc::clone(&frames);
    joycon
        .get_ir_image(&fixed, move |frame| {
            sink_frames.lock().unwrap().push(frame.to_vec());
            true
        })
        .unwrap();

    // The final fragment completes the frame and ends the stream before
    // any ack for it goes out.
    let acks = responder.join().unwrap();
    assert_eq!(acks, vec![0, 1, 2]);

    let frames = frames.lock().unwrap();
    assert_eq!(frames.len(), 1);
    let frame = &frames[0];
    assert_eq!(frame.len(), 4 * 300);
    for frag in 0..=3usize {
        assert!(frame[300 * frag..300 * (frag + 1)]
            .iter()
            .all(|&b| b == frag as u8));
    }
}

#[test]
fn ir_stream_drops_duplicate_fragments_but_acks_them() {
    let (transport, device) = loopback_pair(INPUT_REPORT_EXT_LEN);
    let joycon = JoyConR::new(Box::new(transport));
    let fixed = IrResolution::R30p.config();

    let responder = thread::spawn(move || {
        let _request = device.next_output(WAIT).expect("no stream request");
        thread::sleep(REPLY_DELAY);
        for frag in [0u8, 1, 1, 2, 3] {
            device.inject(&ir_fragment(frag));
        }
        let mut acks = Vec::new();
        while let Some(out) = device.next_output(Duration::from_millis(300)) {
            acks.push(out[14]);
        }
        acks
    });

    let count = Arc::new(Mutex::new(0u32));
    let sink_count = Arc::clone(&count);
    joycon
        .get_ir_image(&fixed, move |_| {
            *sink_count.lock().unwrap() += 1;
            true
        })
        .unwrap();

    // The duplicate is skipped but still acknowledged.
    let acks = responder.join().unwrap();
    assert_eq!(acks, vec![0, 1, 1, 2]);
    assert_eq!(*count.lock().unwrap(), 1);
}

#[test]
fn ir_stream_reacks_on_empty_reports() {
    let (transport, device) = loopback_pair(INPUT_REPORT_EXT_LEN);
    let joycon = JoyConR::new(Box::new(transport));
    let fixed = IrResolution::R30p.config();

    let responder = thread::spawn(move || {
        let _request = device.next_output(WAIT).expect("no stream request");
        thread::sleep(REPLY_DELAY);
        device.inject(&ir_fragment(0));
        device.inject(&ir_fragment(1));
        device.inject(&ir_empty());
        device.inject(&ir_fragment(2));
        device.inject(&ir_fragment(3));
        let mut acks = Vec::new();
        while let Some(out) = device.next_output(Duration::from_millis(300)) {
            acks.push([out[12], out[13], out[14]]);
        }
        acks
    });

    joycon.get_ir_image(&fixed, move |_| true).unwrap();

    let acks = responder.join().unwrap();
    assert_eq!(acks.len(), 4);
    // Fragment acks for 0 and 1, the empty-report re-ack of fragment 1,
    // then the ack for 2.
    assert_eq!(acks[0][2], 0);
    assert_eq!(acks[1][2], 1);
    assert_eq!(acks[2], [0x00, 0x00, 1]);
    assert_eq!(acks[3][2], 2);
}

// ── Full IR session ──

#[test]
fn full_ir_session_brings_up_streams_and_tears_down() {
    let (transport, device) = loopback_pair(INPUT_REPORT_EXT_LEN);
    let joycon = JoyConR::new(Box::new(transport));

    let responder = thread::spawn(move || {
        let mut mcu_mode: u8 = 0x01; // standby once resumed
        let mut streamed = false;
        let mut poll_types = Vec::new();
        while let Some(out) = device.next_output(Duration::from_millis(600)) {
            thread::sleep(REPLY_DELAY);
            match (out[0], out[10]) {
                // input report mode selection
                (0x01, 0x03) => {
                    poll_types.push(out[11]);
                    device.inject(&subcmd_reply(0x03));
                }
                // mcu resume / suspend
                (0x01, 0x22) => device.inject(&subcmd_reply(0x22)),
                // mcu set-mode
                (0x01, 0x21) if out[11] == 0x21 => {
                    mcu_mode = out[13];
                    let mut raw = subcmd_reply(0x21);
                    raw[15] = 0x01;
                    raw[22] = 0x01;
                    device.inject(&raw);
                }
                // ir mode + fragment count write
                (0x01, 0x21) if out[11] == 0x23 && out[12] == 0x01 => {
                    let mut raw = subcmd_reply(0x21);
                    raw[15] = 0x0B;
                    device.inject(&raw);
                }
                // register batch write
                (0x01, 0x21) if out[11] == 0x23 && out[12] == 0x04 => {
                    device.inject(&subcmd_reply(0x21));
                }
                // mcu status request
                (0x11, 0x01) => {
                    let mut raw = vec![0u8; 64];
                    raw[0] = 0x31;
                    raw[49] = 0x01;
                    raw[56] = mcu_mode;
                    device.inject(&raw);
                }
                // ir status request
                (0x11, 0x03) if out[11] == 0x02 => {
                    let mut raw = vec![0u8; 64];
                    raw[0] = 0x31;
                    raw[49] = 0x13;
                    raw[51] = 0x07; // image transfer
                    device.inject(&raw);
                }
                // stream request; later matches are fragment acks
                (0x11, 0x03) if out[11] == 0x00 && !streamed => {
                    streamed = true;
                    for frag in 0..=3u8 {
                        device.inject(&ir_fragment(frag));
                    }
                }
                _ => {}
            }
        }
        poll_types
    });

    let count = Arc::new(Mutex::new(0u32));
    let sink_count = Arc::clone(&count);
    joycon
        .set_ir_config(&IrResolution::R30p.test_config(), move |_| {
            *sink_count.lock().unwrap() += 1;
            true
        })
        .unwrap();

    let poll_types = responder.join().unwrap();
    assert_eq!(*count.lock().unwrap(), 1);
    // NFC/IR reports on the way in, standard reports on the way out.
    assert_eq!(poll_types, vec![0x31, 0x30]);
}

// ── Factory ──

#[test]
fn open_rejects_mismatched_transport_counts() {
    let (transport, _device) = loopback_pair(INPUT_REPORT_LEN);
    let err = open(Category::JoyConDual, vec![Box::new(transport)]).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    let err = open(Category::ProGrip, Vec::new()).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn open_builds_the_requested_variant() {
    let (transport, _device) = loopback_pair(INPUT_REPORT_LEN);
    let pad = open(Category::JoyConR, vec![Box::new(transport)]).unwrap();
    assert_eq!(pad.category(), Category::JoyConR);
}

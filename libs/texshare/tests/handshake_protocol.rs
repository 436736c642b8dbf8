// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Wire grammar of the handshake line and the padded-size rule.

use proptest::prelude::*;
use texshare::core::handshake::{encode_handle_line, is_ack, parse_handle_line};
use texshare::{
    EventName, FaultClass, HandshakeMessage, PixelFormat, ShareError, SharedImageDescriptor,
};

#[test]
fn test_announces_512_square_image() {
    let message = HandshakeMessage {
        memory_handle: 2148,
        width: 512,
        height: 512,
        event_name: EventName::new("SharedTextureTestFrameReady").unwrap(),
    };
    assert_eq!(message.encode(), "2148 512 512 SharedTextureTestFrameReady\n");

    let parsed = HandshakeMessage::parse("2148 512 512 SharedTextureTestFrameReady\n").unwrap();
    assert_eq!(parsed, message);

    let desc = SharedImageDescriptor::new(parsed.width, parsed.height, PixelFormat::Bgra8Unorm)
        .unwrap();
    assert_eq!(desc.nominal_size(), 1_048_576);
    assert_eq!(desc.byte_size(), 2_097_152);
}

#[test]
fn test_tolerates_surrounding_whitespace() {
    let parsed = HandshakeMessage::parse("  7\t640  480 Evt_1 \r\n").unwrap();
    assert_eq!(parsed.memory_handle, 7);
    assert_eq!((parsed.width, parsed.height), (640, 480));
    assert_eq!(parsed.event_name.as_str(), "Evt_1");
}

#[test]
fn test_rejects_near_misses_as_protocol_faults() {
    for line in [
        "",
        "\n",
        "2148 512 512\n",
        "2148 512 512 Evt extra\n",
        "-1 512 512 Evt\n",
        "0x864 512 512 Evt\n",
        "2148 512.0 512 Evt\n",
        "2148 512 512 Evt-Name\n",
        "2148 512 512 Évt\n",
        "2148 99999999999 512 Evt\n",
    ] {
        let err = HandshakeMessage::parse(line).unwrap_err();
        assert!(
            matches!(err, ShareError::MalformedHandshake { .. }),
            "{line:?} gave {err:?}"
        );
        assert_eq!(err.fault_class(), FaultClass::Protocol);
    }
}

#[test]
fn test_rejects_invalid_utf8() {
    let err = HandshakeMessage::parse_bytes(b"2148 512 512 Ev\xfft\n").unwrap_err();
    assert!(matches!(err, ShareError::MalformedHandshake { .. }));
}

#[test]
fn test_semaphore_line_and_ack() {
    assert_eq!(encode_handle_line(3000), "3000\n");
    assert_eq!(parse_handle_line(" 3000 \n").unwrap(), 3000);
    assert!(parse_handle_line("3000 1\n").is_err());

    assert!(is_ack("OK\n"));
    assert!(is_ack("ready"));
    assert!(!is_ack(" \r\n"));
}

proptest! {
    #[test]
    fn prop_encoded_messages_parse_back(
        handle in any::<u64>(),
        width in any::<u32>(),
        height in any::<u32>(),
        name in "[A-Za-z0-9_]{1,48}",
    ) {
        let message = HandshakeMessage {
            memory_handle: handle,
            width,
            height,
            event_name: EventName::new(name).unwrap(),
        };
        prop_assert_eq!(HandshakeMessage::parse(&message.encode()).unwrap(), message);
    }

    #[test]
    fn prop_fifth_field_is_always_rejected(
        fields in prop::collection::vec("[0-9]{1,6}", 3),
        name in "[A-Za-z_]{1,12}",
        extra in "[A-Za-z0-9_]{1,6}",
    ) {
        let line = format!("{} {} {} {} {}\n", fields[0], fields[1], fields[2], name, extra);
        prop_assert!(HandshakeMessage::parse(&line).is_err());
    }

    #[test]
    fn prop_padded_size_is_aligned_and_double(width in 1u32..=4096, height in 1u32..=4096) {
        let desc = SharedImageDescriptor::new(width, height, PixelFormat::Bgra8Unorm).unwrap();
        let nominal = u64::from(width) * u64::from(height) * 4;
        prop_assert_eq!(desc.nominal_size(), nominal);
        prop_assert_eq!(desc.byte_size() % (64 * 1024), 0);
        prop_assert!(desc.byte_size() >= 2 * nominal);
        prop_assert!(desc.byte_size() < 2 * nominal + 64 * 1024);
        // Any driver needing up to twice the nominal size is covered.
        prop_assert!(desc.verify_covers(2 * nominal).is_ok());
    }
}

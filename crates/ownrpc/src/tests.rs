use crate::*;
use ownpack::Decoder;

// ============================================================================
//  MESSAGE LAYOUT
// ============================================================================

#[test]
fn test_message_wire_layout() {
    let msg = Message {
        id: 7,
        fire_and_forget: true,
        topic: "A.B".into(),
        payload: Some(Bytes::from_static(&[0xAA, 0xBB])),
    };
    let bytes = msg.to_bytes().unwrap();

    let mut expected = Vec::new();
    expected.extend_from_slice(&7u32.to_le_bytes());
    expected.push(1);
    expected.extend_from_slice(&3i32.to_le_bytes());
    expected.extend_from_slice(b"A.B");
    expected.extend_from_slice(&2i32.to_le_bytes());
    expected.extend_from_slice(&[0xAA, 0xBB]);
    assert_eq!(bytes, expected);

    assert_eq!(Message::from_bytes(&bytes).unwrap(), msg);
}

#[test]
fn test_absent_and_empty_payload_are_distinct() {
    let absent = Message::notify("ILibraryRepo.SendVolumeChange", None);
    let empty = Message::notify("ILibraryRepo.SendVolumeChange", Some(Bytes::new()));

    let absent_bytes = absent.to_bytes().unwrap();
    let empty_bytes = empty.to_bytes().unwrap();
    assert_eq!(&absent_bytes[absent_bytes.len() - 4..], &(-1i32).to_le_bytes());
    assert_eq!(&empty_bytes[empty_bytes.len() - 4..], &0i32.to_le_bytes());

    assert_eq!(Message::from_bytes(&absent_bytes).unwrap().payload, None);
    assert_eq!(Message::from_bytes(&empty_bytes).unwrap().payload, Some(Bytes::new()));
}

#[test]
fn test_empty_topic_rejected() {
    let msg = Message::notify("", None);
    assert!(matches!(msg.to_bytes(), Err(RpcError::InvalidTopic(_))));

    let mut bytes = Vec::new();
    bytes.extend_from_slice(&1u32.to_le_bytes());
    bytes.push(0);
    bytes.extend_from_slice(&0i32.to_le_bytes());
    bytes.extend_from_slice(&(-1i32).to_le_bytes());
    assert!(matches!(Message::from_bytes(&bytes), Err(RpcError::InvalidTopic(_))));
}

#[test]
fn test_truncated_message() {
    let bytes = Message::request("X.Y", Some(Bytes::from_static(b"abc"))).to_bytes().unwrap();
    let err = Message::from_bytes(&bytes[..bytes.len() - 1]).unwrap_err();
    assert_eq!(err, RpcError::Serialization(ownpack::Error::UnexpectedEnd));
}

// ============================================================================
//  FRAME SECTIONS
// ============================================================================

#[test]
fn test_prefix_decode() {
    let bytes = Message::request("Lib.Op", None).to_bytes().unwrap();
    let prefix: [u8; PREFIX_LEN] = bytes[..PREFIX_LEN].try_into().unwrap();
    let prefix = Prefix::decode(&prefix, 1024).unwrap();
    assert_eq!(prefix, Prefix { id: 0, fire_and_forget: false, topic_len: 6 });
}

#[test]
fn test_prefix_rejects_bad_topic_length() {
    let mut bytes = [0u8; PREFIX_LEN];
    bytes[5..].copy_from_slice(&(-1i32).to_le_bytes());
    assert!(matches!(Prefix::decode(&bytes, 1024), Err(RpcError::ProtocolViolation(_))));

    bytes[5..].copy_from_slice(&4096i32.to_le_bytes());
    assert_eq!(
        Prefix::decode(&bytes, 1024).unwrap_err(),
        RpcError::FrameTooLarge { len: 4096, cap: 1024 }
    );
}

#[test]
fn test_payload_len_sentinels() {
    assert_eq!(decode_payload_len(&(-1i32).to_le_bytes(), 10).unwrap(), None);
    assert_eq!(decode_payload_len(&0i32.to_le_bytes(), 10).unwrap(), Some(0));
    assert!(decode_payload_len(&(-2i32).to_le_bytes(), 10).is_err());
    assert!(decode_payload_len(&11i32.to_le_bytes(), 10).is_err());
}

// ============================================================================
//  TOPICS
// ============================================================================

#[test]
fn test_reserved_topics() {
    assert_eq!(Message::close().reserved(), Some(Reserved::Close));
    assert_eq!(Message::ping().reserved(), Some(Reserved::Ping));
    assert_eq!(Message::sync(None).reserved(), Some(Reserved::Sync));
    assert_eq!(Message::answer(3, &Answer::ok()).unwrap().reserved(), Some(Reserved::Answer));
    assert_eq!(Message::notify("ILibraryRepo.SendVolumeChange", None).reserved(), None);

    assert!(!Message::ping().fire_and_forget);
    assert!(Message::close().fire_and_forget);
}

#[test]
fn test_topic_parse_splits_on_first_dot() {
    let topic = Topic::parse("ILibraryRepo.Send.Volume.Change").unwrap();
    assert_eq!(topic.interface(), "ILibraryRepo");
    assert_eq!(topic.operation(), "Send.Volume.Change");
    assert_eq!(topic.to_wire(), "ILibraryRepo.Send.Volume.Change");
}

#[test]
fn test_topic_validation() {
    assert!(Topic::parse("NoDot").is_err());
    assert!(Topic::parse(".Op").is_err());
    assert!(Topic::parse("Iface.").is_err());
    assert!(Topic::parse("-close").is_err());
    assert!(Topic::new("A.B", "C").is_err());
    assert!(Topic::new("-A", "C").is_err());
    assert_eq!("IPlaylistRepo.OnSongsChange".parse::<Topic>().unwrap().interface(), "IPlaylistRepo");
}

// ============================================================================
//  ANSWERS
// ============================================================================

#[test]
fn test_answer_roundtrip() {
    let answer = Answer::ok_with(Bytes::from_static(b"state"));
    let msg = Message::answer(42, &answer).unwrap();
    assert_eq!(msg.id, 42);

    let decoded = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap();
    assert_eq!(Answer::from_payload(decoded.payload_bytes()).unwrap(), answer);
}

#[test]
fn test_answer_without_payload_is_ok() {
    assert_eq!(Answer::from_payload(None).unwrap(), Answer::ok());
}

#[test]
fn test_unknown_answer_code() {
    let mut bytes = 99i32.to_le_bytes().to_vec();
    bytes.extend_from_slice(&(-1i32).to_le_bytes());
    let mut dec = Decoder::new(&bytes);
    assert_eq!(Answer::decode(&mut dec).unwrap_err(), RpcError::UnknownAnswerCode(99));
}

#[test]
fn test_negative_answer_codes() {
    for code in [AnswerCode::Unsupported, AnswerCode::Failed] {
        let bytes = Answer::failed(code).to_bytes().unwrap();
        let back = Answer::from_payload(Some(&bytes)).unwrap();
        assert_eq!(back.code, code);
        assert!(!back.code.is_ok());
    }
}

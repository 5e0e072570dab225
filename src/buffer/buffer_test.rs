use super::*;

#[test]
fn test_head_and_end_reads() {
    let mut channel = ByteBufferChannel::new();
    assert!(channel.read_head(1).is_none());

    channel.write_end(b"world");
    channel.write_head(b"hello ");
    assert_eq!(channel.as_slice(), b"hello world");

    assert_eq!(&channel.read_head(6).unwrap()[..], b"hello ");
    assert_eq!(&channel.read_end(3).unwrap()[..], b"rld");
    assert_eq!(channel.as_slice(), b"wo");

    // over-long reads drain what is there
    assert_eq!(&channel.read_end(10).unwrap()[..], b"wo");
    assert!(channel.read_end(1).is_none());
}

#[test]
fn test_index_of() {
    let mut channel = ByteBufferChannel::new();
    channel.write_end(b"abc\r\ndef\r\n");
    assert_eq!(channel.index_of(b"\r\n"), 3);
    assert_eq!(channel.index_of(b"def"), 5);
    assert_eq!(channel.index_of(b"xyz"), -1);
    assert_eq!(channel.index_of(b""), -1);
    assert_eq!(channel.get(1), Some(b'b'));
    assert_eq!(channel.get(100), None);
}

#[test]
fn test_read_with_split() {
    let mut channel = ByteBufferChannel::new();
    channel.write_end(b"key=value;rest");
    assert_eq!(&channel.read_with_split(b"=").unwrap()[..], b"key");
    assert_eq!(&channel.read_with_split(b";").unwrap()[..], b"value");
    assert!(channel.read_with_split(b";").is_none());
    assert_eq!(channel.as_slice(), b"rest");
}

#[test]
fn test_shrink() {
    let mut channel = ByteBufferChannel::new();
    channel.write_end(b"0123456789");
    assert_eq!(channel.shrink_head(2), 2);
    assert_eq!(channel.shrink_end(2), 2);
    assert_eq!(channel.as_slice(), b"234567");
    assert_eq!(channel.shrink_at(1, 2), 2);
    assert_eq!(channel.as_slice(), b"2567");
    assert_eq!(channel.shrink_at(10, 2), 0);
    assert_eq!(channel.shrink_end(100), 4);
    assert!(channel.is_empty());
}

#[test]
fn test_compact_keeps_content() {
    let mut channel = ByteBufferChannel::with_capacity(4096);
    channel.write_end(&[7u8; 1000]);
    channel.shrink_head(990);
    channel.compact();
    assert_eq!(channel.size(), 10);
    assert!(channel.capacity() < 4096);
    assert!(channel.as_slice().iter().all(|b| *b == 7));

    channel.write_end(&[1u8; 5000]);
    assert_eq!(channel.size(), 5010);
    channel.clear();
    assert!(channel.is_empty());
}

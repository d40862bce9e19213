use crate::Needle;

mod read_tests;

/// A needle exercising every optional field.
fn full_needle() -> Needle {
    let mut n = Needle::new(42, 0xdead_beef, b"hello world".to_vec());
    n.set_name(b"h.txt".to_vec());
    n.set_mime(b"text/plain".to_vec());
    n.set_last_modified(1_700_000_000);
    n.set_ttl(0x0305);
    n.set_pairs(b"k1=v1&k2=v2".to_vec());
    n
}

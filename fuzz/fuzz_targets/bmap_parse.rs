use honggfuzz::fuzz;

fn main() {
    loop {
        fuzz!(|data: &[u8]| {
            if let Ok(text) = std::str::from_utf8(data) {
                if let Ok(bmap) = bmap2simg::Bmap::from_xml(text) {
                    // Batching is linear in the range length; fuzzed maps can
                    // declare ranges of billions of blocks.
                    for range in bmap.ranges().filter(|r| r.block_count() <= 1 << 16) {
                        let covered: u64 = bmap.batches(range, 8).map(|b| b.len).sum();
                        assert_eq!(covered, range.block_count());
                    }
                }
            }
        });
    }
}

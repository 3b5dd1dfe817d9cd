use honggfuzz::fuzz;

fn main() {
    loop {
        fuzz!(|data: &[u8]| {
            let _ = bmap2simg::sparse::decode_image(data);
        });
    }
}

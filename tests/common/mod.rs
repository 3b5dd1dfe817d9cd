#![allow(dead_code)]

use std::io::Cursor;

use bmap2simg::checksum::digest_hex;
use bmap2simg::sparse::decode_image;
use bmap2simg::{Bmap, ChecksumType, ChunkType, Config, Converter, SourceImage, Summary};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

/// Random image contents, reproducible from `seed`.
pub fn image_data(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; len];
    rng.fill_bytes(&mut data);
    data
}

/// Version 2.0 bmap with SHA-256 range digests computed from `data`.
pub fn bmap_xml(data: &[u8], block_size: u64, ranges: &[(u64, u64)]) -> String {
    let blocks = (data.len() as u64).div_ceil(block_size);
    let mut map = String::new();
    let mut mapped = 0;
    for &(first, last) in ranges {
        let start = (first * block_size) as usize;
        let end = (((last + 1) * block_size) as usize).min(data.len());
        let sum = digest_hex(ChecksumType::Sha256, &data[start..end]);
        map.push_str(&format!("        <Range chksum=\"{sum}\"> {first}-{last} </Range>\n"));
        mapped += last - first + 1;
    }
    format!(
        r#"<?xml version="1.0" ?>
<bmap version="2.0">
    <ImageSize> {} </ImageSize>
    <BlockSize> {block_size} </BlockSize>
    <BlocksCount> {blocks} </BlocksCount>
    <MappedBlocksCount> {mapped} </MappedBlocksCount>
    <ChecksumType> sha256 </ChecksumType>
    <BlockMap>
{map}    </BlockMap>
</bmap>
"#,
        data.len()
    )
}

pub fn convert_bytes(
    data: &[u8],
    xml: &str,
    config: Config,
) -> bmap2simg::Result<(Summary, Vec<u8>)> {
    let bmap = Bmap::from_xml(xml)?;
    let mut out = Vec::new();
    let source = SourceImage::new(Cursor::new(data.to_vec()), data.len() as u64);
    let summary = Converter::new(&bmap, config)?.run(source, Cursor::new(&mut out))?;
    Ok((summary, out))
}

pub fn chunk_kinds(out: &[u8]) -> Vec<(ChunkType, u32)> {
    decode_image(out)
        .unwrap()
        .chunks
        .iter()
        .map(|c| (c.header.chunk_type, c.header.blocks))
        .collect()
}

/// Expand a sparse image back into a flat image, filling don't-care blocks
/// with `fill`.
pub fn expand(out: &[u8], fill: u8) -> Vec<u8> {
    let image = decode_image(out).unwrap();
    let bs = image.header.block_size as usize;
    let mut flat = Vec::new();
    for chunk in &image.chunks {
        let len = chunk.header.blocks as usize * bs;
        match chunk.header.chunk_type {
            ChunkType::Raw => {
                flat.extend_from_slice(&out[chunk.body_offset..chunk.body_offset + len])
            }
            _ => flat.extend(std::iter::repeat(fill).take(len)),
        }
    }
    flat
}

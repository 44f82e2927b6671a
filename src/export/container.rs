//! Framing of the binary glTF container.

use std::borrow::Cow;
use std::io::Write;

use rootcause::Report;

use crate::error::{ExportError, ExportResult};

pub const GLB_MAGIC: [u8; 4] = *b"glTF";
pub const GLB_VERSION: u32 = 2;
pub const HEADER_LENGTH: usize = 12;
pub const CHUNK_HEADER_LENGTH: usize = 8;
/// `JSON` in little-endian.
pub const CHUNK_TYPE_JSON: u32 = 0x4E4F_534A;
/// `BIN\0` in little-endian.
pub const CHUNK_TYPE_BIN: u32 = 0x004E_4942;

pub fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// Chunk sizes of a container, computed before anything is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerLayout {
    pub json_length: usize,
    pub json_padded: usize,
    /// `None` when the container has no BIN chunk.
    pub bin_length: Option<usize>,
    pub bin_padded: usize,
    pub total_length: u32,
}

impl ContainerLayout {
    pub fn compute(json_length: usize, bin_length: Option<usize>) -> ExportResult<Self> {
        let json_padded = align4(json_length);
        let bin_padded = bin_length.map_or(0, align4);
        let bin_chunk = bin_length.map_or(0, |_| CHUNK_HEADER_LENGTH + bin_padded);
        let total = (HEADER_LENGTH + CHUNK_HEADER_LENGTH + json_padded + bin_chunk) as u64;
        let total_length = u32::try_from(total)
            .map_err(|_| Report::new(ExportError::ContainerTooLarge(total)))?;
        Ok(Self {
            json_length,
            json_padded,
            bin_length,
            bin_padded,
            total_length,
        })
    }
}

/// Write header, JSON chunk (space padded) and, when present, BIN chunk (zero padded).
pub fn write_container(
    json: Vec<u8>,
    bin: Option<Vec<u8>>,
    writer: &mut impl Write,
) -> ExportResult<ContainerLayout> {
    let layout = ContainerLayout::compute(json.len(), bin.as_ref().map(Vec::len))?;

    let glb = gltf::binary::Glb {
        header: gltf::binary::Header {
            magic: GLB_MAGIC,
            version: GLB_VERSION,
            length: layout.total_length,
        },
        json: Cow::Owned(json),
        bin: bin.map(Cow::Owned),
    };

    glb.to_writer(writer)
        .map_err(|e| Report::new(ExportError::Io(e.to_string())))?;

    Ok(layout)
}

//! # Edit Record Format
//!
//! One record per chunk, rewritten whole on every flush.
//!
//! ```text
//! [4 bytes: magic "TCED"]
//! [2 bytes: version]
//! [8 bytes: world seed]
//! [4 bytes: chunk x]
//! [4 bytes: chunk z]
//! [4 bytes: edit count]
//! [N bytes: LZ4 body, size-prepended]
//! [4 bytes: CRC32 of everything above]
//!
//! Body entry:
//! [1 byte: local x] [2 bytes: y] [1 byte: local z]
//! [2 bytes: block id] [2 bytes: block state]
//! [1 byte: entity tag (0 none, 1 furnace, 2 chest, 3 sign)]
//! [entity payload]
//! ```
//!
//! All integers are little endian.

use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use terracraft_procedural::{
    Block, BlockEntity, BlockId, BlockState, ChunkCoord, ItemStack, LocalPos, CHEST_SLOTS, MAX_SIGN_LINE_BYTES,
    MAX_WORLD_HEIGHT, SIGN_LINES,
};

use crate::datastore::Edit;

/// Magic bytes identifying an edit record.
const MAGIC: &[u8; 4] = b"TCED";

/// Current record format version.
const VERSION: u16 = 1;

/// Header length: magic + version + seed + cx + cz + count.
const HEADER_LEN: usize = 4 + 2 + 8 + 4 + 4 + 4;

/// Entity type tags.
const TAG_NONE: u8 = 0;
const TAG_FURNACE: u8 = 1;
const TAG_CHEST: u8 = 2;
const TAG_SIGN: u8 = 3;

/// Serializes the edits of one chunk.
#[must_use]
pub fn encode(seed: u64, coord: ChunkCoord, edits: &[Edit]) -> Vec<u8> {
    let mut body = Vec::with_capacity(edits.len() * 9);
    for edit in edits {
        body.push(edit.pos.x());
        body.extend_from_slice(&edit.pos.y().to_le_bytes());
        body.push(edit.pos.z());
        body.extend_from_slice(&edit.block.id.raw().to_le_bytes());
        body.extend_from_slice(&edit.block.state.raw().to_le_bytes());
        write_entity(&mut body, edit.entity.as_ref());
    }

    let mut out = Vec::with_capacity(HEADER_LEN + body.len() / 2 + 8);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&seed.to_le_bytes());
    out.extend_from_slice(&coord.x.to_le_bytes());
    out.extend_from_slice(&coord.z.to_le_bytes());
    out.extend_from_slice(&(edits.len() as u32).to_le_bytes());
    out.extend_from_slice(&compress_prepend_size(&body));

    let crc = crc32fast::hash(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

fn write_stack(buf: &mut Vec<u8>, stack: Option<&ItemStack>) {
    match stack {
        Some(stack) => {
            buf.push(1);
            buf.extend_from_slice(&stack.item.raw().to_le_bytes());
            buf.push(stack.count);
        }
        None => buf.push(0),
    }
}

fn write_entity(buf: &mut Vec<u8>, entity: Option<&BlockEntity>) {
    match entity {
        None => buf.push(TAG_NONE),
        Some(BlockEntity::Furnace { input, fuel, output, burn_ticks, cook_progress }) => {
            buf.push(TAG_FURNACE);
            write_stack(buf, input.as_ref());
            write_stack(buf, fuel.as_ref());
            write_stack(buf, output.as_ref());
            buf.extend_from_slice(&burn_ticks.to_le_bytes());
            buf.extend_from_slice(&cook_progress.to_le_bytes());
        }
        Some(BlockEntity::Chest { slots }) => {
            buf.push(TAG_CHEST);
            buf.push(u8::try_from(slots.len()).unwrap_or(u8::MAX));
            for slot in slots {
                write_stack(buf, slot.as_ref());
            }
        }
        Some(BlockEntity::Sign { lines }) => {
            buf.push(TAG_SIGN);
            for line in lines {
                let text = &line[..char_floor(line, MAX_SIGN_LINE_BYTES)];
                buf.extend_from_slice(&(text.len() as u16).to_le_bytes());
                buf.extend_from_slice(text.as_bytes());
            }
        }
    }
}

/// Largest char boundary of `text` at or below `limit`.
fn char_floor(text: &str, limit: usize) -> usize {
    if text.len() <= limit {
        return text.len();
    }
    (0..=limit).rev().find(|&i| text.is_char_boundary(i)).unwrap_or(0)
}

/// Parses and verifies a record written by [`encode`].
///
/// # Errors
///
/// A description of the first integrity violation: bad magic, version,
/// CRC, seed or coordinate, a truncated body, or an invalid entry.
pub fn decode(seed: u64, coord: ChunkCoord, data: &[u8]) -> Result<Vec<Edit>, String> {
    if data.len() < HEADER_LEN + 4 {
        return Err(format!("record too short ({} bytes)", data.len()));
    }

    let (payload, trailer) = data.split_at(data.len() - 4);
    let stored_crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let actual_crc = crc32fast::hash(payload);
    if stored_crc != actual_crc {
        return Err(format!("CRC mismatch: stored {stored_crc:08x}, computed {actual_crc:08x}"));
    }

    let mut header = Reader::new(&payload[..HEADER_LEN]);
    if header.bytes(4)? != MAGIC {
        return Err("bad magic".into());
    }
    let version = header.u16()?;
    if version != VERSION {
        return Err(format!("unsupported version {version}"));
    }
    let record_seed = header.u64()?;
    if record_seed != seed {
        return Err(format!("record belongs to seed {record_seed:016x}"));
    }
    let record_coord = ChunkCoord::new(header.i32()?, header.i32()?);
    if record_coord != coord {
        return Err(format!("record belongs to chunk {record_coord}"));
    }
    let count = header.u32()? as usize;

    let body = decompress_size_prepended(&payload[HEADER_LEN..]).map_err(|e| format!("decompression failed: {e}"))?;

    let mut reader = Reader::new(&body);
    let mut edits = Vec::with_capacity(count.min(body.len() / 9 + 1));
    for _ in 0..count {
        edits.push(read_edit(&mut reader)?);
    }
    if !reader.is_empty() {
        return Err(format!("{} trailing bytes after {count} edits", reader.remaining()));
    }
    Ok(edits)
}

fn read_edit(reader: &mut Reader<'_>) -> Result<Edit, String> {
    let x = reader.u8()?;
    let y = reader.u16()?;
    let z = reader.u8()?;
    let pos = LocalPos::new(i32::from(x), i32::from(y), i32::from(z), MAX_WORLD_HEIGHT)
        .map_err(|_| format!("local position ({x}, {y}, {z}) outside chunk"))?;
    let id = BlockId(reader.u16()?);
    let state = BlockState::from_raw(reader.u16()?);
    let entity = read_entity(reader)?;

    Ok(Edit {
        pos,
        block: Block::with_state(id, state),
        entity,
    })
}

fn read_stack(reader: &mut Reader<'_>) -> Result<Option<ItemStack>, String> {
    match reader.u8()? {
        0 => Ok(None),
        1 => {
            let item = BlockId(reader.u16()?);
            let count = reader.u8()?;
            if count == 0 {
                return Err("empty item stack".into());
            }
            Ok(Some(ItemStack::new(item, count)))
        }
        flag => Err(format!("bad item stack flag {flag}")),
    }
}

fn read_entity(reader: &mut Reader<'_>) -> Result<Option<BlockEntity>, String> {
    match reader.u8()? {
        TAG_NONE => Ok(None),
        TAG_FURNACE => Ok(Some(BlockEntity::Furnace {
            input: read_stack(reader)?,
            fuel: read_stack(reader)?,
            output: read_stack(reader)?,
            burn_ticks: reader.u16()?,
            cook_progress: reader.u16()?,
        })),
        TAG_CHEST => {
            let len = usize::from(reader.u8()?);
            if len != CHEST_SLOTS {
                return Err(format!("chest with {len} slots"));
            }
            let slots = (0..len).map(|_| read_stack(reader)).collect::<Result<Vec<_>, _>>()?;
            Ok(Some(BlockEntity::Chest { slots }))
        }
        TAG_SIGN => {
            let mut lines: [String; SIGN_LINES] = Default::default();
            for line in &mut lines {
                let len = usize::from(reader.u16()?);
                let bytes = reader.bytes(len)?;
                *line = String::from_utf8(bytes.to_vec()).map_err(|_| "sign text is not UTF-8".to_string())?;
            }
            Ok(Some(BlockEntity::Sign { lines }))
        }
        tag => Err(format!("unknown entity tag {tag}")),
    }
}

/// Bounds-checked little-endian cursor.
struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    const fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], String> {
        let end = self.offset.checked_add(len).filter(|end| *end <= self.data.len()).ok_or_else(|| {
            format!("truncated: wanted {len} bytes at offset {}", self.offset)
        })?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], String> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, String> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, String> {
        self.array().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> Result<u32, String> {
        self.array().map(u32::from_le_bytes)
    }

    fn i32(&mut self) -> Result<i32, String> {
        self.array().map(i32::from_le_bytes)
    }

    fn u64(&mut self) -> Result<u64, String> {
        self.array().map(u64::from_le_bytes)
    }

    const fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    const fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terracraft_procedural::{BlockEntityKind, Facing};

    fn local(x: u8, y: u16, z: u8) -> LocalPos {
        LocalPos::new(i32::from(x), i32::from(y), i32::from(z), MAX_WORLD_HEIGHT).unwrap()
    }

    fn edit(x: u8, y: u16, z: u8, id: BlockId, entity: Option<BlockEntity>) -> Edit {
        Edit { pos: local(x, y, z), block: Block::new(id), entity }
    }

    fn sample_edits() -> Vec<Edit> {
        let mut slots = vec![None; CHEST_SLOTS];
        slots[3] = Some(ItemStack::new(BlockId::COBBLESTONE, 64));
        vec![
            edit(1, 64, 1, BlockId::WATER, None),
            Edit {
                pos: local(15, 127, 0),
                block: Block::with_state(BlockId::FURNACE, BlockState::DEFAULT.with_facing(Facing::South)),
                entity: Some(BlockEntity::Furnace {
                    input: Some(ItemStack::new(BlockId::IRON_ORE, 3)),
                    fuel: None,
                    output: Some(ItemStack::new(BlockId::STONE, 1)),
                    burn_ticks: 120,
                    cook_progress: 7,
                }),
            },
            edit(0, 0, 15, BlockId::CHEST, Some(BlockEntity::Chest { slots })),
            edit(
                4,
                70,
                4,
                BlockId::SIGN,
                Some(BlockEntity::Sign { lines: ["spawn".into(), String::new(), "→ north".into(), "x".into()] }),
            ),
        ]
    }

    #[test]
    fn test_record_preserves_every_entity_kind() {
        let coord = ChunkCoord::new(5, -3);
        let edits = sample_edits();
        let decoded = decode(42, coord, &encode(42, coord, &edits)).unwrap();
        assert_eq!(decoded, edits);
        assert_eq!(decoded[2].entity.as_ref().map(BlockEntity::kind), Some(BlockEntityKind::Chest));
    }

    #[test]
    fn test_empty_record() {
        let coord = ChunkCoord::new(0, 0);
        assert!(decode(1, coord, &encode(1, coord, &[])).unwrap().is_empty());
    }

    #[test]
    fn test_crc_detects_flipped_bit() {
        let coord = ChunkCoord::new(1, 2);
        let mut data = encode(42, coord, &sample_edits());
        let middle = data.len() / 2;
        data[middle] ^= 0x10;
        let err = decode(42, coord, &data).unwrap_err();
        assert!(err.contains("CRC"), "{err}");
    }

    #[test]
    fn test_wrong_owner_rejected() {
        let coord = ChunkCoord::new(1, 2);
        let data = encode(42, coord, &sample_edits());
        assert!(decode(43, coord, &data).unwrap_err().contains("seed"));
        assert!(decode(42, ChunkCoord::new(2, 1), &data).unwrap_err().contains("chunk"));
    }

    #[test]
    fn test_truncated_record() {
        let coord = ChunkCoord::new(0, 0);
        assert!(decode(42, coord, b"TCED").is_err());
        assert!(decode(42, coord, &[]).is_err());
    }

    #[test]
    fn test_long_sign_line_cut_on_char_boundary() {
        let coord = ChunkCoord::new(0, 0);
        let mut line = "a".repeat(MAX_SIGN_LINE_BYTES - 1);
        line.push('é');
        let sign = BlockEntity::Sign { lines: [line, String::new(), String::new(), String::new()] };
        let data = encode(1, coord, &[edit(0, 1, 0, BlockId::SIGN, Some(sign))]);

        let decoded = decode(1, coord, &data).unwrap();
        match &decoded[0].entity {
            Some(BlockEntity::Sign { lines }) => assert_eq!(lines[0], "a".repeat(MAX_SIGN_LINE_BYTES - 1)),
            other => panic!("Expected sign, got {other:?}"),
        }
        assert_eq!(char_floor("héllo", 2), 1);
        assert_eq!(char_floor("abc", 10), 3);
    }

    #[test]
    fn test_header_layout() {
        let coord = ChunkCoord::new(-1, 7);
        let data = encode(0xABCD, coord, &[edit(0, 1, 0, BlockId::STONE, None)]);
        assert_eq!(&data[0..4], b"TCED");
        assert_eq!(u16::from_le_bytes([data[4], data[5]]), VERSION);
        assert_eq!(u64::from_le_bytes(data[6..14].try_into().unwrap()), 0xABCD);
        assert_eq!(i32::from_le_bytes(data[14..18].try_into().unwrap()), -1);
        assert_eq!(i32::from_le_bytes(data[18..22].try_into().unwrap()), 7);
        assert_eq!(u32::from_le_bytes(data[22..26].try_into().unwrap()), 1);
    }
}

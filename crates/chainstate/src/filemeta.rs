use smartd_primitives::encoding::{Decoder, Encoder};

/// Aggregate metadata for one block file and its undo companion.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BlockFileInfo {
    pub blocks: u32,
    pub size: u64,
    pub undo_size: u64,
    pub height_first: i32,
    pub height_last: i32,
    pub time_first: u32,
    pub time_last: u32,
}

impl BlockFileInfo {
    pub fn add_block(&mut self, height: i32, time: u32) {
        if self.blocks == 0 || height < self.height_first {
            self.height_first = height;
        }
        if self.blocks == 0 || time < self.time_first {
            self.time_first = time;
        }
        if height > self.height_last {
            self.height_last = height;
        }
        if time > self.time_last {
            self.time_last = time;
        }
        self.blocks += 1;
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_u32_le(self.blocks);
        encoder.write_u64_le(self.size);
        encoder.write_u64_le(self.undo_size);
        encoder.write_i32_le(self.height_first);
        encoder.write_i32_le(self.height_last);
        encoder.write_u32_le(self.time_first);
        encoder.write_u32_le(self.time_last);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let mut decoder = Decoder::new(bytes);
        let blocks = decoder.read_u32_le().ok()?;
        let size = decoder.read_u64_le().ok()?;
        let undo_size = decoder.read_u64_le().ok()?;
        let height_first = decoder.read_i32_le().ok()?;
        let height_last = decoder.read_i32_le().ok()?;
        let time_first = decoder.read_u32_le().ok()?;
        let time_last = decoder.read_u32_le().ok()?;
        if !decoder.is_empty() {
            return None;
        }
        Some(Self {
            blocks,
            size,
            undo_size,
            height_first,
            height_last,
            time_first,
            time_last,
        })
    }
}

pub fn file_info_key(file_id: u32) -> [u8; 4] {
    file_id.to_le_bytes()
}

pub fn parse_file_info_key(key: &[u8]) -> Option<u32> {
    Some(u32::from_le_bytes(key.try_into().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let mut info = BlockFileInfo::default();
        info.add_block(10, 1_000);
        info.add_block(12, 1_200);
        info.add_block(11, 900);
        info.size = 4_096;
        info.undo_size = 512;
        let back = BlockFileInfo::decode(&info.encode()).expect("decode");
        assert_eq!(back, info);
        assert_eq!(back.blocks, 3);
        assert_eq!(back.height_first, 10);
        assert_eq!(back.height_last, 12);
        assert_eq!(back.time_first, 900);
        assert_eq!(back.time_last, 1_200);
    }
}

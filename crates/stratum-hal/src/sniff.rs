//! Filesystem identification by fixed-offset signatures.
//!
//! Each probe reads at most [`PROBE_WINDOW`] bytes. Signatures are evaluated in table order
//! and the first match wins; swap is checked last because its magic lives at the end of
//! the area it describes rather than at the start.

use crate::fs_kind::FsKind;
use crate::{HalError, HalResult};
use std::io::{Read, Seek, SeekFrom};

pub const PROBE_WINDOW: usize = 4096;

/// btrfs keeps its primary superblock 64 KiB into the device.
pub const BTRFS_SUPERBLOCK_OFFSET: u64 = 0x10000;

pub const SWAP_MAGIC: &[u8] = b"SWAPSPACE2";

const EXT_EXTENTS: Flag = Flag {
    offset: 1124,
    mask: 0x40,
};
const EXT_HAS_JOURNAL: Flag = Flag {
    offset: 1084,
    mask: 0x04,
};
const SWAP_LABEL: LabelField = LabelField {
    offset: 1052,
    len: 16,
};

/// Which bounded window a signature is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// First bytes of the partition.
    Start,
    /// The btrfs superblock area.
    BtrfsSuperblock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelField {
    pub offset: usize,
    pub len: usize,
}

#[derive(Debug, Clone, Copy)]
struct Flag {
    offset: usize,
    mask: u8,
}

impl Flag {
    fn is_set(&self, buf: &[u8]) -> bool {
        buf.get(self.offset).is_some_and(|b| b & self.mask != 0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Signature {
    pub window: Window,
    pub offset: usize,
    pub magic: &'static [u8],
    /// Number of bytes from `offset` the magic may appear anywhere within.
    pub span: usize,
    pub kind: FsKind,
    pub label: Option<LabelField>,
}

impl Signature {
    fn matches(&self, buf: &[u8]) -> bool {
        let end = (self.offset + self.span).min(buf.len());
        match buf.get(self.offset..end) {
            Some(area) if area.len() >= self.magic.len() => area
                .windows(self.magic.len())
                .any(|candidate| candidate == self.magic),
            _ => false,
        }
    }
}

pub const SIGNATURES: &[Signature] = &[
    Signature {
        window: Window::Start,
        offset: 1080,
        magic: &[0x53, 0xEF],
        span: 2,
        kind: FsKind::Ext2,
        label: Some(LabelField {
            offset: 1144,
            len: 16,
        }),
    },
    Signature {
        window: Window::Start,
        offset: 54,
        magic: b"FAT",
        span: 3,
        kind: FsKind::Fat16,
        label: Some(LabelField {
            offset: 43,
            len: 11,
        }),
    },
    Signature {
        window: Window::Start,
        offset: 82,
        magic: b"FAT32",
        span: 9,
        kind: FsKind::Fat32,
        label: Some(LabelField {
            offset: 71,
            len: 11,
        }),
    },
    Signature {
        window: Window::BtrfsSuperblock,
        offset: 0x40,
        magic: b"_BHRfS_M",
        span: 8,
        kind: FsKind::Btrfs,
        label: Some(LabelField {
            offset: 0x12b,
            len: 256,
        }),
    },
    Signature {
        window: Window::Start,
        offset: 0,
        magic: b"XFSB",
        span: 4,
        kind: FsKind::Xfs,
        label: Some(LabelField {
            offset: 108,
            len: 12,
        }),
    },
];

/// Result of a successful probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sniffed {
    pub kind: FsKind,
    pub label: Option<String>,
}

/// Identify the filesystem of the partition at `offset` spanning `length` bytes.
pub fn detect<R: Read + Seek>(reader: &mut R, offset: u64, length: u64) -> HalResult<Sniffed> {
    let start = read_window(reader, offset, length, 0)?;
    let btrfs = if length > BTRFS_SUPERBLOCK_OFFSET {
        read_window(reader, offset, length, BTRFS_SUPERBLOCK_OFFSET)?
    } else {
        Vec::new()
    };

    if let Some(found) = classify(&start, &btrfs) {
        return Ok(found);
    }

    if has_trailing_swap_magic(reader, offset, length)? || has_page_swap_magic(&start) {
        return Ok(Sniffed {
            kind: FsKind::Swap,
            label: read_label(&start, SWAP_LABEL),
        });
    }

    Err(HalError::UnknownFilesystem)
}

/// Evaluate the signature table against already-read windows.
pub fn classify(start: &[u8], btrfs: &[u8]) -> Option<Sniffed> {
    SIGNATURES.iter().find_map(|sig| {
        let buf = match sig.window {
            Window::Start => start,
            Window::BtrfsSuperblock => btrfs,
        };
        if !sig.matches(buf) {
            return None;
        }
        let kind = if sig.kind.is_ext() {
            ext_revision(buf)
        } else {
            sig.kind
        };
        Some(Sniffed {
            kind,
            label: sig.label.and_then(|field| read_label(buf, field)),
        })
    })
}

fn ext_revision(buf: &[u8]) -> FsKind {
    if EXT_EXTENTS.is_set(buf) {
        FsKind::Ext4
    } else if EXT_HAS_JOURNAL.is_set(buf) {
        FsKind::Ext3
    } else {
        FsKind::Ext2
    }
}

fn read_label(buf: &[u8], field: LabelField) -> Option<String> {
    let raw = buf.get(field.offset..field.offset + field.len)?;
    let raw = match raw.iter().position(|b| *b == 0) {
        Some(nul) => &raw[..nul],
        None => raw,
    };
    let label = String::from_utf8_lossy(raw).trim_end().to_string();
    if label.is_empty() || label == "NO NAME" {
        None
    } else {
        Some(label)
    }
}

fn read_window<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    length: u64,
    relative: u64,
) -> HalResult<Vec<u8>> {
    let available = length.saturating_sub(relative).min(PROBE_WINDOW as u64);
    let mut buf = Vec::with_capacity(PROBE_WINDOW);
    reader.seek(SeekFrom::Start(offset + relative))?;
    reader.by_ref().take(available).read_to_end(&mut buf)?;
    buf.resize(PROBE_WINDOW, 0);
    Ok(buf)
}

fn has_trailing_swap_magic<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    length: u64,
) -> HalResult<bool> {
    let magic_len = SWAP_MAGIC.len() as u64;
    if length < magic_len {
        return Ok(false);
    }
    let mut tail = Vec::with_capacity(SWAP_MAGIC.len());
    reader.seek(SeekFrom::Start(offset + length - magic_len))?;
    reader.by_ref().take(magic_len).read_to_end(&mut tail)?;
    Ok(tail == SWAP_MAGIC)
}

// mkswap writes the magic at the end of the first page.
fn has_page_swap_magic(start: &[u8]) -> bool {
    start.ends_with(SWAP_MAGIC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn ext_buffer() -> Vec<u8> {
        let mut buf = vec![0u8; PROBE_WINDOW];
        buf[1080] = 0x53;
        buf[1081] = 0xEF;
        buf
    }

    fn detect_in(buf: Vec<u8>) -> HalResult<Sniffed> {
        let len = buf.len() as u64;
        detect(&mut Cursor::new(buf), 0, len)
    }

    #[test]
    fn ext_with_extents_is_ext4() {
        let mut buf = ext_buffer();
        buf[1124] = 0x40;
        assert_eq!(detect_in(buf).unwrap().kind, FsKind::Ext4);
    }

    #[test]
    fn ext_with_journal_is_ext3() {
        let mut buf = ext_buffer();
        buf[1084] = 0x04;
        assert_eq!(detect_in(buf).unwrap().kind, FsKind::Ext3);
    }

    #[test]
    fn plain_ext_is_ext2() {
        assert_eq!(detect_in(ext_buffer()).unwrap().kind, FsKind::Ext2);
    }

    #[test]
    fn extents_win_over_journal() {
        let mut buf = ext_buffer();
        buf[1124] = 0x40;
        buf[1084] = 0x04;
        assert_eq!(detect_in(buf).unwrap().kind, FsKind::Ext4);
    }

    #[test]
    fn blank_buffer_is_unknown() {
        let err = detect_in(vec![0u8; PROBE_WINDOW]).unwrap_err();
        assert!(matches!(err, HalError::UnknownFilesystem));
    }

    #[test]
    fn ext_label_is_extracted() {
        let mut buf = ext_buffer();
        buf[1144..1151].copy_from_slice(b"MYLABEL");
        assert_eq!(detect_in(buf).unwrap().label.as_deref(), Some("MYLABEL"));
    }

    #[test]
    fn fat16_signature_and_label() {
        let mut buf = vec![0u8; PROBE_WINDOW];
        buf[54..62].copy_from_slice(b"FAT16   ");
        buf[43..54].copy_from_slice(b"EFI        ");
        let found = detect_in(buf).unwrap();
        assert_eq!(found.kind, FsKind::Fat16);
        assert_eq!(found.label.as_deref(), Some("EFI"));
    }

    #[test]
    fn fat32_tolerates_padding_shift() {
        let mut buf = vec![0u8; PROBE_WINDOW];
        buf[84..89].copy_from_slice(b"FAT32");
        assert_eq!(detect_in(buf).unwrap().kind, FsKind::Fat32);
    }

    #[test]
    fn fat32_default_label_is_ignored() {
        let mut buf = vec![0u8; PROBE_WINDOW];
        buf[82..90].copy_from_slice(b"FAT32   ");
        buf[71..82].copy_from_slice(b"NO NAME    ");
        assert_eq!(detect_in(buf).unwrap().label, None);
    }

    #[test]
    fn btrfs_magic_is_read_from_superblock_window() {
        let mut buf = vec![0u8; BTRFS_SUPERBLOCK_OFFSET as usize + PROBE_WINDOW];
        let sb = BTRFS_SUPERBLOCK_OFFSET as usize;
        buf[sb + 0x40..sb + 0x48].copy_from_slice(b"_BHRfS_M");
        buf[sb + 0x12b..sb + 0x12b + 4].copy_from_slice(b"DATA");
        let found = detect_in(buf).unwrap();
        assert_eq!(found.kind, FsKind::Btrfs);
        assert_eq!(found.label.as_deref(), Some("DATA"));
    }

    #[test]
    fn xfs_signature() {
        let mut buf = vec![0u8; PROBE_WINDOW];
        buf[0..4].copy_from_slice(b"XFSB");
        buf[108..112].copy_from_slice(b"ROOT");
        let found = detect_in(buf).unwrap();
        assert_eq!(found.kind, FsKind::Xfs);
        assert_eq!(found.label.as_deref(), Some("ROOT"));
    }

    #[test]
    fn table_order_decides_between_matches() {
        let mut buf = ext_buffer();
        buf[0..4].copy_from_slice(b"XFSB");
        assert_eq!(detect_in(buf).unwrap().kind, FsKind::Ext2);
    }

    #[test]
    fn swap_at_partition_end() {
        let mut buf = vec![0u8; 3 * PROBE_WINDOW];
        let len = buf.len();
        buf[len - SWAP_MAGIC.len()..].copy_from_slice(SWAP_MAGIC);
        assert_eq!(detect_in(buf).unwrap().kind, FsKind::Swap);
    }

    #[test]
    fn swap_at_first_page_end() {
        let mut buf = vec![0u8; 2 * PROBE_WINDOW];
        buf[PROBE_WINDOW - SWAP_MAGIC.len()..PROBE_WINDOW].copy_from_slice(SWAP_MAGIC);
        buf[1052..1056].copy_from_slice(b"SWAP");
        let found = detect_in(buf).unwrap();
        assert_eq!(found.kind, FsKind::Swap);
        assert_eq!(found.label.as_deref(), Some("SWAP"));
    }

    #[test]
    fn detect_honours_partition_offset() {
        let offset = 2048 * 512;
        let mut disk = vec![0u8; offset + PROBE_WINDOW];
        disk[offset..offset + 4].copy_from_slice(b"XFSB");
        let found = detect(&mut Cursor::new(disk), offset as u64, PROBE_WINDOW as u64).unwrap();
        assert_eq!(found.kind, FsKind::Xfs);
    }

    #[test]
    fn reads_stay_inside_small_partitions() {
        // A partition shorter than the window must not pick up the neighbour's magic.
        let mut disk = vec![0u8; 2 * PROBE_WINDOW];
        disk[1080] = 0x53;
        disk[1081] = 0xEF;
        let err = detect(&mut Cursor::new(disk), 0, 1024).unwrap_err();
        assert!(matches!(err, HalError::UnknownFilesystem));
    }
}

//! Raw BAM record I/O.
//!
//! Pass 2 never re-interprets records: each one is serialized once and
//! the duplicate bit is patched directly in the encoded bytes before
//! they go to the BGZF writer.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use noodles::bam;
use noodles::bgzf::io::Writer as BgzfWriter;
use noodles::sam::Header as SamHeader;
use noodles::sam::alignment::io::Write as SamWrite;

/// Byte offset of the flag field in an encoded record:
/// block_size (4) + ref_id (4) + pos (4) + l_read_name/mapq/bin (4)
/// + n_cigar_op (2).
pub const FLAG_OFFSET: usize = 18;

/// The duplicate bit of the flags field.
pub const DUPLICATE_FLAG: u16 = 0x400;

/// Sets or clears the duplicate bit in an encoded record.
///
/// Returns the new flag value, or `None` when the buffer is too short
/// to hold a record.
#[inline]
pub fn set_duplicate_flag(data: &mut [u8], is_duplicate: bool) -> Option<u16> {
    if data.len() < FLAG_OFFSET + 2 {
        return None;
    }

    let flag = u16::from_le_bytes([data[FLAG_OFFSET], data[FLAG_OFFSET + 1]]);
    let new_flag = if is_duplicate {
        flag | DUPLICATE_FLAG
    } else {
        flag & !DUPLICATE_FLAG
    };

    data[FLAG_OFFSET] = new_flag as u8;
    data[FLAG_OFFSET + 1] = (new_flag >> 8) as u8;

    Some(new_flag)
}

/// Writes the SAM header through an already-open BGZF stream.
pub fn write_header(writer: &mut BgzfWriter<File>, header: &SamHeader) -> Result<()> {
    let mut buf = Vec::new();
    {
        let mut writer = bam::io::Writer::from(&mut buf);
        writer.write_header(header)?;
    }
    writer.write_all(&buf)?;
    Ok(())
}

/// Serializes a record into `buf` (cleared first), block-size prefix
/// included.
pub fn encode_record_into(
    buf: &mut Vec<u8>,
    header: &SamHeader,
    record: &bam::Record,
) -> Result<()> {
    buf.clear();
    let mut writer = bam::io::Writer::from(buf);
    writer.write_alignment_record(header, record)?;
    Ok(())
}

/// The 28-byte empty BGZF block every complete BAM file ends with.
const BGZF_EOF: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43, 0x02,
    0x00, 0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Verifies the input ends with the BGZF EOF block; a missing block
/// usually means a truncated file.
pub fn check_bgzf_eof(path: &Path) -> Result<()> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let len = file.metadata()?.len();
    if len < BGZF_EOF.len() as u64 {
        bail!("{} is too short to be a BAM file", path.display());
    }

    file.seek(SeekFrom::End(-(BGZF_EOF.len() as i64)))?;
    let mut trailer = [0u8; 28];
    file.read_exact(&mut trailer)?;
    if trailer != BGZF_EOF {
        bail!(
            "{} does not end with a BGZF EOF block (truncated file?); \
             pass --noeof to skip this check",
            path.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{bam_records, read_spec, single_ref_header};
    use noodles::sam::alignment::record::Flags;

    fn encoded_record(flags: Flags) -> Vec<u8> {
        let header = single_ref_header();
        let records = bam_records(&header, &[read_spec("r1", 0, 100, "50M", flags)]);
        let mut buf = Vec::new();
        encode_record_into(&mut buf, &header, &records[0]).unwrap();
        buf
    }

    fn flag_at(data: &[u8]) -> u16 {
        u16::from_le_bytes([data[FLAG_OFFSET], data[FLAG_OFFSET + 1]])
    }

    #[test]
    fn flag_offset_reads_the_encoded_flags() {
        let flags = Flags::SEGMENTED | Flags::REVERSE_COMPLEMENTED;
        let data = encoded_record(flags);
        assert_eq!(flag_at(&data), u16::from(flags));
    }

    #[test]
    fn setting_the_duplicate_bit_preserves_other_bits() {
        let flags = Flags::SEGMENTED | Flags::FIRST_SEGMENT;
        let mut data = encoded_record(flags);
        let new_flag = set_duplicate_flag(&mut data, true);
        assert_eq!(new_flag, Some(u16::from(flags) | DUPLICATE_FLAG));
        assert_eq!(flag_at(&data), u16::from(flags) | DUPLICATE_FLAG);
    }

    #[test]
    fn clearing_the_duplicate_bit() {
        let mut data = encoded_record(Flags::DUPLICATE);
        let new_flag = set_duplicate_flag(&mut data, false);
        assert_eq!(new_flag, Some(0));
    }

    #[test]
    fn short_buffers_are_refused() {
        let mut data = [0u8; FLAG_OFFSET];
        assert!(set_duplicate_flag(&mut data, true).is_none());
    }

    #[test]
    fn eof_check_accepts_a_finished_bam() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ok.bam");
        let header = single_ref_header();
        let mut writer = bam::io::Writer::new(std::fs::File::create(&path).unwrap());
        writer.write_header(&header).unwrap();
        writer.into_inner().finish().unwrap();

        check_bgzf_eof(&path).unwrap();
    }

    #[test]
    fn eof_check_rejects_a_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cut.bam");
        std::fs::write(&path, vec![0u8; 64]).unwrap();
        assert!(check_bgzf_eof(&path).is_err());
    }
}

//! In-memory BAM fixtures for unit tests.

use std::num::NonZeroUsize;

use noodles::bam;
use noodles::core::Position;
use noodles::sam::{
    self,
    alignment::{
        io::Write as _,
        record::Flags,
        record::cigar::{Op, op::Kind},
        record::data::field::Tag,
        record_buf::{
            Cigar, QualityScores, RecordBuf, Sequence, data::field::Value,
        },
    },
    header::record::value::{
        Map,
        map::{ReadGroup, ReferenceSequence, read_group::tag},
    },
};

pub(crate) struct ReadSpec {
    pub name: String,
    pub reference_id: i32,
    pub pos0: i32,
    pub cigar: String,
    pub flags: Flags,
    pub quals: Option<Vec<u8>>,
    pub mate: Option<(i32, i32)>,
    pub read_group: Option<String>,
}

pub(crate) fn read_spec(
    name: &str,
    reference_id: i32,
    pos0: i32,
    cigar: &str,
    flags: Flags,
) -> ReadSpec {
    ReadSpec {
        name: name.to_string(),
        reference_id,
        pos0,
        cigar: cigar.to_string(),
        flags,
        quals: None,
        mate: None,
        read_group: None,
    }
}

impl ReadSpec {
    pub(crate) fn with_quals(mut self, quals: Vec<u8>) -> Self {
        self.quals = Some(quals);
        self
    }

    pub(crate) fn with_mate(mut self, reference_id: i32, pos0: i32) -> Self {
        self.mate = Some((reference_id, pos0));
        self
    }

    pub(crate) fn with_read_group(mut self, id: &str) -> Self {
        self.read_group = Some(id.to_string());
        self
    }
}

pub(crate) fn single_ref_header() -> sam::Header {
    sam::Header::builder()
        .add_reference_sequence(
            "sq0",
            Map::<ReferenceSequence>::new(NonZeroUsize::try_from(100_000_000).unwrap()),
        )
        .build()
}

pub(crate) fn two_ref_header() -> sam::Header {
    sam::Header::builder()
        .add_reference_sequence(
            "sq0",
            Map::<ReferenceSequence>::new(NonZeroUsize::try_from(100_000_000).unwrap()),
        )
        .add_reference_sequence(
            "sq1",
            Map::<ReferenceSequence>::new(NonZeroUsize::try_from(100_000_000).unwrap()),
        )
        .build()
}

/// Header with the given `(read group id, library)` pairs.
pub(crate) fn header_with_read_groups(groups: &[(&str, Option<&str>)]) -> sam::Header {
    let mut builder = sam::Header::builder().add_reference_sequence(
        "sq0",
        Map::<ReferenceSequence>::new(NonZeroUsize::try_from(100_000_000).unwrap()),
    );

    for (id, library) in groups {
        let read_group = match library {
            Some(name) => Map::<ReadGroup>::builder()
                .insert(tag::LIBRARY, *name)
                .build()
                .unwrap(),
            None => Map::<ReadGroup>::default(),
        };
        builder = builder.add_read_group(*id, read_group);
    }

    builder.build()
}

fn parse_cigar(text: &str) -> Vec<Op> {
    let mut ops = Vec::new();
    let mut len = 0usize;
    for c in text.chars() {
        if let Some(digit) = c.to_digit(10) {
            len = len * 10 + digit as usize;
            continue;
        }
        let kind = match c {
            'M' => Kind::Match,
            'I' => Kind::Insertion,
            'D' => Kind::Deletion,
            'N' => Kind::Skip,
            'S' => Kind::SoftClip,
            'H' => Kind::HardClip,
            'P' => Kind::Pad,
            '=' => Kind::SequenceMatch,
            'X' => Kind::SequenceMismatch,
            _ => panic!("bad cigar op {c:?}"),
        };
        ops.push(Op::new(kind, len));
        len = 0;
    }
    ops
}

fn build_record(spec: &ReadSpec) -> RecordBuf {
    let ops = parse_cigar(&spec.cigar);
    let read_len: usize = ops
        .iter()
        .filter(|op| op.kind().consumes_read())
        .map(|op| op.len())
        .sum();

    let mut builder = RecordBuf::builder()
        .set_name(spec.name.clone())
        .set_flags(spec.flags)
        .set_sequence(Sequence::from(vec![b'A'; read_len]))
        .set_quality_scores(QualityScores::from(
            spec.quals.clone().unwrap_or_else(|| vec![30; read_len]),
        ))
        .set_cigar(ops.into_iter().collect::<Cigar>());

    if spec.reference_id >= 0 {
        builder = builder
            .set_reference_sequence_id(spec.reference_id as usize)
            .set_alignment_start(Position::try_from(spec.pos0 as usize + 1).unwrap());
    }

    if let Some((mate_ref, mate_pos0)) = spec.mate {
        builder = builder
            .set_mate_reference_sequence_id(mate_ref as usize)
            .set_mate_alignment_start(Position::try_from(mate_pos0 as usize + 1).unwrap());
    }

    if let Some(read_group) = &spec.read_group {
        builder = builder.set_data(
            [(Tag::READ_GROUP, Value::from(read_group.as_str()))]
                .into_iter()
                .collect(),
        );
    }

    builder.build()
}

/// Serializes the specs through the BAM codec and reads them back as the
/// lazily-decoded records the engine consumes.
pub(crate) fn bam_records(header: &sam::Header, specs: &[ReadSpec]) -> Vec<bam::Record> {
    let mut writer = bam::io::Writer::new(Vec::new());
    writer.write_header(header).unwrap();
    for spec in specs {
        let record = build_record(spec);
        writer.write_alignment_record(header, &record).unwrap();
    }
    let buf = writer.into_inner().finish().unwrap();

    let mut reader = bam::io::Reader::new(&buf[..]);
    reader.read_header().unwrap();

    let mut records = Vec::new();
    let mut record = bam::Record::default();
    while reader.read_record(&mut record).unwrap() != 0 {
        records.push(record.clone());
    }
    records
}

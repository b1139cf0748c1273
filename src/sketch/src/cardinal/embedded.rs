use std::collections::HashSet;
use std::fmt;

use hyperloglogplus::{HyperLogLog, HyperLogLogPlus};
use pds_utils::hash::XxHashBuilder;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::cardinal::Cardinal;
use crate::error::{Result, SketchError};
use crate::snapshot::{self, SnapshotKind};
use crate::types::CardinalDescriptor;

/// DEFAULT_PRECISION is the register index width of embedded counters,
/// 2^14 registers for a standard error around 0.8%.
pub const DEFAULT_PRECISION: u8 = 14;

/// Index width of the sparse representation.
const SPARSE_PRECISION: u8 = 25;

/// 6-bit registers packed five to a u32 word.
const REGISTER_BITS: usize = 6;
const REGISTERS_PER_WORD: usize = 5;

type Core = HyperLogLogPlus<[u8], XxHashBuilder>;

/// EmbeddedCardinal is a HyperLogLog++ counter held in process memory.
///
/// Hashing is seeded and the seed travels with the snapshot, so a restored
/// counter keeps deduplicating values added before the snapshot.
pub struct EmbeddedCardinal {
    descriptor: CardinalDescriptor,
    precision: u8,
    core: Mutex<Core>,
}

impl EmbeddedCardinal {
    pub fn new(descriptor: CardinalDescriptor) -> Result<Self> {
        Self::with_precision(descriptor, DEFAULT_PRECISION)
    }

    pub fn with_precision(descriptor: CardinalDescriptor, precision: u8) -> Result<Self> {
        let core = HyperLogLogPlus::new(precision, XxHashBuilder::default())
            .map_err(|e| SketchError::InvalidParameters(format!("{:?}", e)))?;
        Ok(Self {
            descriptor,
            precision,
            core: Mutex::new(core),
        })
    }
}

impl fmt::Debug for EmbeddedCardinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedCardinal")
            .field("descriptor", &self.descriptor)
            .field("precision", &self.precision)
            .finish()
    }
}

#[async_trait]
impl Cardinal for EmbeddedCardinal {
    fn descriptor(&self) -> &CardinalDescriptor {
        &self.descriptor
    }

    fn physical_key(&self) -> Option<&str> {
        None
    }

    /// HLL++ does not report whether a register moved, so every add reads as
    /// a change, duplicates included.
    async fn add(&self, value: &[u8]) -> bool {
        self.core.lock().await.insert(value);
        true
    }

    async fn estimate(&self) -> u64 {
        self.core.lock().await.count().round() as u64
    }

    async fn serialize(&self) -> Result<Vec<u8>> {
        let core = self.core.lock().await;
        let payload =
            bincode::serialize(&*core).map_err(|e| SketchError::Serialization(e.to_string()))?;
        Ok(snapshot::encode(SnapshotKind::HyperLogLog, &payload))
    }

    async fn restore(&self, data: &[u8]) -> Result<()> {
        let payload = snapshot::decode(SnapshotKind::HyperLogLog, data)?;
        let image: CoreImage =
            bincode::deserialize(payload).map_err(|e| SketchError::Deserialization(e.to_string()))?;
        image.check(self.precision)?;

        let core: Core =
            bincode::deserialize(payload).map_err(|e| SketchError::Deserialization(e.to_string()))?;

        *self.core.lock().await = core;
        Ok(())
    }
}

/// CoreImage reads the serde layout of `HyperLogLogPlus` (hyperloglogplus
/// 0.4). The library indexes its buffers without bounds checks, so a snapshot
/// is checked through this image before it is decoded for real.
#[derive(Debug, Deserialize)]
#[cfg_attr(test, derive(serde::Serialize))]
struct CoreImage {
    #[allow(dead_code)]
    builder: XxHashBuilder,
    precision: u8,
    counts: (usize, usize, usize),
    #[allow(dead_code)]
    tmpset: HashSet<u32>,
    sparse: SparseImage,
    registers: Option<RegistersImage>,
}

/// Difference encoded, varint packed hash codes.
#[derive(Debug, Deserialize)]
#[cfg_attr(test, derive(serde::Serialize))]
struct SparseImage {
    count: usize,
    last: u32,
    buf: Vec<u8>,
}

#[derive(Debug, Deserialize)]
#[cfg_attr(test, derive(serde::Serialize))]
struct RegistersImage {
    buf: Vec<u32>,
    count: usize,
    zeros: usize,
}

impl CoreImage {
    fn check(&self, precision: u8) -> Result<()> {
        if self.precision != precision {
            return Err(malformed(format!(
                "precision {}, expected {}",
                self.precision, precision
            )));
        }

        let registers = 1_usize << precision;
        let counts = (
            registers,
            1_usize << (SPARSE_PRECISION - 1),
            4 * registers / REGISTERS_PER_WORD,
        );
        if self.counts != counts {
            return Err(malformed(format!("counts {:?}, expected {:?}", self.counts, counts)));
        }

        self.sparse.check()?;
        if let Some(dense) = &self.registers {
            dense.check(registers)?;
        }
        Ok(())
    }
}

impl SparseImage {
    fn check(&self) -> Result<()> {
        let (mut index, mut last, mut decoded) = (0, 0_u32, 0);
        while index < self.buf.len() {
            let (mut dif, mut shift) = (0_u32, 0);
            loop {
                // a u32 takes at most five varint bytes
                if shift > 28 {
                    return Err(malformed(format!("varint at byte {} is too long", index)));
                }
                let byte = *self
                    .buf
                    .get(index)
                    .ok_or_else(|| malformed("sparse list ends inside a varint".to_string()))?;
                index += 1;
                dif |= u32::from(byte & 0x7f) << shift;
                if byte & 0x80 == 0 {
                    break;
                }
                shift += 7;
            }
            last = last
                .checked_add(dif)
                .ok_or_else(|| malformed("sparse hash codes overflow".to_string()))?;
            decoded += 1;
        }

        if decoded != self.count || last != self.last {
            return Err(malformed(format!(
                "sparse list holds {} codes ending at {}, header says {} ending at {}",
                decoded, last, self.count, self.last
            )));
        }
        Ok(())
    }
}

impl RegistersImage {
    fn check(&self, registers: usize) -> Result<()> {
        let words = (registers + REGISTERS_PER_WORD - 1) / REGISTERS_PER_WORD;
        if self.count != registers || self.buf.len() != words {
            return Err(malformed(format!(
                "{} registers in {} words, expected {} in {}",
                self.count,
                self.buf.len(),
                registers,
                words
            )));
        }

        let mask = (1_u32 << REGISTER_BITS) - 1;
        let zeros = self
            .buf
            .iter()
            .flat_map(|word| (0..REGISTERS_PER_WORD).map(move |i| (word >> (i * REGISTER_BITS)) & mask))
            .take(registers)
            .filter(|r| *r == 0)
            .count();
        if zeros != self.zeros {
            return Err(malformed(format!(
                "{} zero registers, header says {}",
                zeros, self.zeros
            )));
        }
        Ok(())
    }
}

fn malformed(reason: String) -> SketchError {
    SketchError::Deserialization(format!("hyperloglog snapshot: {}", reason))
}

#[cfg(test)]
mod tests {
    use crate::cardinal::embedded::CoreImage;
    use crate::cardinal::{Cardinal, EmbeddedCardinal};
    use crate::error::SketchError;
    use crate::snapshot::{self, SnapshotKind, HEADER_SIZE};
    use crate::types::{CardinalDescriptor, CardinalType};

    fn visits() -> EmbeddedCardinal {
        EmbeddedCardinal::new(CardinalDescriptor::new(CardinalType::Embedded, "visits")).unwrap()
    }

    #[tokio::test]
    async fn test_small_estimate() {
        let counter = visits();
        assert_eq!(counter.estimate().await, 0);

        assert!(counter.add(b"ip1").await);
        assert!(counter.add(b"ip2").await);
        // duplicates also report a change
        assert!(counter.add(b"ip1").await);
        assert_eq!(counter.estimate().await, 2);
    }

    #[tokio::test]
    async fn test_large_estimate_within_error() {
        let counter = visits();
        // every value twice
        for _ in 0..2 {
            for i in 0..20_000 {
                counter.add(format!("user-{}", i).as_bytes()).await;
            }
        }

        let estimate = counter.estimate().await as f64;
        let error = (estimate - 20_000.0).abs() / 20_000.0;
        assert!(error < 0.05, "estimate {} off by {}", estimate, error);
    }

    #[tokio::test]
    async fn test_serialize_restore() {
        let counter = visits();
        for i in 0..5000 {
            counter.add(format!("v{}", i).as_bytes()).await;
        }
        let before = counter.estimate().await;
        let data = counter.serialize().await.unwrap();

        let restored = visits();
        restored.restore(&data).await.unwrap();
        assert_eq!(restored.estimate().await, before);

        // values seen before the snapshot are still deduplicated
        for i in 0..5000 {
            restored.add(format!("v{}", i).as_bytes()).await;
        }
        assert_eq!(restored.estimate().await, before);
    }

    #[tokio::test]
    async fn test_restore_rejects_malformed() {
        let counter = visits();
        counter.add(b"ip1").await;

        for case in [vec![], vec![1, 2, 3, 4, 5, 6, 7, 8]] {
            assert!(matches!(
                counter.restore(&case).await,
                Err(SketchError::Deserialization(_))
            ));
        }

        let mut truncated = counter.serialize().await.unwrap();
        truncated.truncate(truncated.len() - 1);
        assert!(counter.restore(&truncated).await.is_err());

        assert_eq!(counter.estimate().await, 1);
    }

    #[test]
    fn test_rejects_bad_precision() {
        let d = CardinalDescriptor::new(CardinalType::Embedded, "visits");
        assert!(matches!(
            EmbeddedCardinal::with_precision(d, 30),
            Err(SketchError::InvalidParameters(_))
        ));
    }

    async fn image_of(counter: &EmbeddedCardinal) -> CoreImage {
        let data = counter.serialize().await.unwrap();
        bincode::deserialize(&data[HEADER_SIZE..]).unwrap()
    }

    fn snapshot_of(image: &CoreImage) -> Vec<u8> {
        snapshot::encode(SnapshotKind::HyperLogLog, &bincode::serialize(image).unwrap())
    }

    async fn assert_rejected(counter: &EmbeddedCardinal, data: &[u8]) {
        match counter.restore(data).await {
            Err(SketchError::Deserialization(_)) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_restore_rejects_tampered_precision() {
        let counter = visits();
        for i in 0..20_000 {
            counter.add(format!("user-{}", i).as_bytes()).await;
        }
        let before = counter.estimate().await;
        let mut data = counter.serialize().await.unwrap();

        // precision follows the 8 byte hasher seed
        assert_eq!(data[HEADER_SIZE + 8], 14);
        data[HEADER_SIZE + 8] = 18;
        assert_rejected(&counter, &data).await;

        counter.add(b"one more").await;
        assert!(counter.estimate().await >= before);
    }

    #[tokio::test]
    async fn test_restore_rejects_inconsistent_registers() {
        let counter = visits();
        for i in 0..20_000 {
            counter.add(format!("user-{}", i).as_bytes()).await;
        }
        assert!(image_of(&counter).await.registers.is_some());

        // the image itself round trips
        let target = visits();
        target.restore(&snapshot_of(&image_of(&counter).await)).await.unwrap();
        assert_eq!(target.estimate().await, counter.estimate().await);

        let mut image = image_of(&counter).await;
        if let Some(r) = image.registers.as_mut() {
            r.zeros += 1;
        }
        assert_rejected(&target, &snapshot_of(&image)).await;

        let mut image = image_of(&counter).await;
        if let Some(r) = image.registers.as_mut() {
            r.buf.pop();
        }
        assert_rejected(&target, &snapshot_of(&image)).await;

        let mut image = image_of(&counter).await;
        image.counts.0 += 1;
        assert_rejected(&target, &snapshot_of(&image)).await;
    }

    #[tokio::test]
    async fn test_restore_rejects_inconsistent_sparse_list() {
        let counter = visits();
        for ip in ["ip1", "ip2", "ip3"] {
            counter.add(ip.as_bytes()).await;
        }
        // estimating moves pending codes into the sparse list
        assert_eq!(counter.estimate().await, 3);
        let image = image_of(&counter).await;
        assert!(image.registers.is_none());
        assert_eq!(image.sparse.count, 3);

        let mut image = image_of(&counter).await;
        image.sparse.buf.push(0x80);
        assert_rejected(&counter, &snapshot_of(&image)).await;

        let mut image = image_of(&counter).await;
        image.sparse.count += 1;
        assert_rejected(&counter, &snapshot_of(&image)).await;

        let mut image = image_of(&counter).await;
        image.sparse.last += 1;
        assert_rejected(&counter, &snapshot_of(&image)).await;

        let mut image = image_of(&counter).await;
        image.sparse.buf.extend_from_slice(&[0xff, 0xff, 0xff, 0xff, 0xff, 0x01]);
        image.sparse.count += 1;
        assert_rejected(&counter, &snapshot_of(&image)).await;

        assert_eq!(counter.estimate().await, 3);
    }
}

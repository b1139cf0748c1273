use std::fmt;

use bloomfilter::Bloom;
use bytes::{Buf, BufMut};
use tokio::sync::Mutex;

use crate::error::{Result, SketchError};
use crate::filter::Filter;
use crate::params::{check_bloom_size, estimate_bloom, validate};
use crate::snapshot::{self, SnapshotKind};
use crate::types::FilterDescriptor;

/// Payload's fixed part: | bits(8B) | hashes(4B) | sip keys(4 * 8B) | bitmap len(4B) |
const PAYLOAD_FIXED_SIZE: usize = 8 + 4 + 4 * 8 + 4;

/// EmbeddedFilter is a Bloom filter held in process memory.
///
/// The bit array is allocated with exactly the bit and hash counts the
/// parameter deriver computes, so the descriptor describes the real filter.
pub struct EmbeddedFilter {
    descriptor: FilterDescriptor,
    bits: u64,
    core: Mutex<Bloom<[u8]>>,
}

impl EmbeddedFilter {
    /// new allocates an empty filter. Fails if the tuning is invalid or the
    /// bit array would exceed `MAX_FILTER_BITS`.
    pub fn new(descriptor: FilterDescriptor) -> Result<Self> {
        validate(descriptor.max_cardinality, descriptor.max_fp)?;
        let (bits, hashes) = estimate_bloom(descriptor.max_cardinality, descriptor.max_fp);
        check_bloom_size(bits)?;
        let len = bitmap_len(bits).ok_or_else(|| {
            SketchError::InvalidParameters(format!("{} bits do not fit in memory", bits))
        })?;

        let bitmap = vec![0_u8; len];
        let sip_keys = [rand::random(), rand::random()];
        let core = Bloom::from_existing(&bitmap, bits, hashes, sip_keys);

        Ok(Self {
            descriptor,
            bits,
            core: Mutex::new(core),
        })
    }

    pub fn bits(&self) -> u64 {
        self.bits
    }
}

impl fmt::Debug for EmbeddedFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedFilter")
            .field("descriptor", &self.descriptor)
            .field("bits", &self.bits)
            .finish()
    }
}

#[async_trait]
impl Filter for EmbeddedFilter {
    fn descriptor(&self) -> &FilterDescriptor {
        &self.descriptor
    }

    fn physical_key(&self) -> Option<&str> {
        None
    }

    async fn add(&self, value: &[u8]) -> bool {
        let mut core = self.core.lock().await;
        !core.check_and_set(value)
    }

    async fn exists(&self, value: &[u8]) -> bool {
        self.core.lock().await.check(value)
    }

    async fn serialize(&self) -> Result<Vec<u8>> {
        let core = self.core.lock().await;
        Ok(encode(&core))
    }

    async fn restore(&self, data: &[u8]) -> Result<()> {
        let bloom = decode(data)?;
        if bloom.number_of_bits() != self.bits
            || bloom.number_of_hash_functions() != self.descriptor.hash_func_num
        {
            return Err(SketchError::Deserialization(format!(
                "snapshot holds {} bits / {} hashes, filter {} expects {} / {}",
                bloom.number_of_bits(),
                bloom.number_of_hash_functions(),
                self.descriptor.key,
                self.bits,
                self.descriptor.hash_func_num
            )));
        }

        *self.core.lock().await = bloom;
        Ok(())
    }
}

/// bitmap_len is the byte length of a bitmap of `bits` bits, `None` if it
/// does not fit in `usize`.
fn bitmap_len(bits: u64) -> Option<usize> {
    let bytes = bits / 8 + u64::from(bits % 8 != 0);
    usize::try_from(bytes).ok()
}

fn encode(bloom: &Bloom<[u8]>) -> Vec<u8> {
    let bitmap = bloom.bitmap();

    let mut payload = Vec::with_capacity(PAYLOAD_FIXED_SIZE + bitmap.len());
    payload.put_u64(bloom.number_of_bits());
    payload.put_u32(bloom.number_of_hash_functions());
    for (k0, k1) in bloom.sip_keys() {
        payload.put_u64(k0);
        payload.put_u64(k1);
    }
    payload.put_u32(bitmap.len() as u32);
    payload.extend_from_slice(&bitmap);

    snapshot::encode(SnapshotKind::BloomFilter, &payload)
}

fn decode(data: &[u8]) -> Result<Bloom<[u8]>> {
    let mut buf = snapshot::decode(SnapshotKind::BloomFilter, data)?;
    if buf.remaining() < PAYLOAD_FIXED_SIZE {
        return Err(SketchError::Deserialization(format!(
            "bloom filter payload too short: {} bytes",
            buf.remaining()
        )));
    }

    let bits = buf.get_u64();
    let hashes = buf.get_u32();
    let sip_keys = [
        (buf.get_u64(), buf.get_u64()),
        (buf.get_u64(), buf.get_u64()),
    ];
    let len = buf.get_u32() as usize;

    if bits == 0 || hashes == 0 {
        return Err(SketchError::Deserialization(format!(
            "bloom filter with {} bits and {} hashes",
            bits, hashes
        )));
    }
    if bits > len as u64 * 8 || bitmap_len(bits) != Some(len) || buf.remaining() != len {
        return Err(SketchError::Deserialization(format!(
            "bitmap of {} bits does not match its length {}, payload has {} bytes",
            bits,
            len,
            buf.remaining()
        )));
    }

    Ok(Bloom::from_existing(buf, bits, hashes, sip_keys))
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;
    use quickcheck::quickcheck;

    use crate::error::SketchError;
    use crate::filter::{EmbeddedFilter, Filter};
    use crate::snapshot::{self, SnapshotKind};
    use crate::types::{FilterDescriptor, FilterType};

    fn users_filter() -> EmbeddedFilter {
        let d = FilterDescriptor::new(FilterType::Embedded, "users", 1000, 0.01).unwrap();
        EmbeddedFilter::new(d).unwrap()
    }

    #[tokio::test]
    async fn test_add_exists() {
        let filter = users_filter();
        assert_eq!(filter.bits(), 9586);
        assert_eq!(filter.descriptor().hash_func_num, 7);
        assert!(filter.physical_key().is_none());

        assert!(!filter.exists(b"alice").await);
        assert!(filter.add(b"alice").await);
        assert!(filter.exists(b"alice").await);
        // second insert changes nothing
        assert!(!filter.add(b"alice").await);
    }

    #[tokio::test]
    async fn test_false_positive_rate() {
        let filter = users_filter();
        for i in 0..1000 {
            filter.add(format!("member-{}", i).as_bytes()).await;
        }

        let trials = 10_000;
        let mut false_positives = 0;
        for _ in 0..trials {
            let candidate = format!("candidate-{}", rand::random::<u64>());
            if filter.exists(candidate.as_bytes()).await {
                false_positives += 1;
            }
        }
        // declared rate is 0.01 at full capacity
        assert!(
            (false_positives as f64 / trials as f64) <= 0.02,
            "{} false positives in {} trials",
            false_positives,
            trials
        );
    }

    #[tokio::test]
    async fn test_serialize_restore() {
        let filter = users_filter();
        let values: Vec<String> = (0..200).map(|i| format!("v{}", i)).collect();
        for v in &values {
            filter.add(v.as_bytes()).await;
        }
        let data = filter.serialize().await.unwrap();

        let restored = users_filter();
        restored.restore(&data).await.unwrap();
        for v in &values {
            assert!(restored.exists(v.as_bytes()).await);
        }
        for i in 0..200 {
            let candidate = format!("x{}", i);
            assert_eq!(
                filter.exists(candidate.as_bytes()).await,
                restored.exists(candidate.as_bytes()).await
            );
        }
        assert_eq!(restored.serialize().await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_restore_rejects_malformed() {
        let filter = users_filter();
        filter.add(b"alice").await;
        let data = filter.serialize().await.unwrap();

        let cases: Vec<Vec<u8>> = vec![
            vec![],
            b"not a snapshot".to_vec(),
            data[..data.len() - 1].to_vec(),
            [data.as_slice(), &[0]].concat(),
            snapshot::encode(SnapshotKind::HyperLogLog, &data[snapshot::HEADER_SIZE..]),
        ];
        for case in cases {
            match filter.restore(&case).await {
                Err(SketchError::Deserialization(_)) => {}
                other => panic!("unexpected: {:?}", other),
            }
        }
        // failed restores keep the previous state
        assert!(filter.exists(b"alice").await);
    }

    fn bloom_snapshot(bits: u64, hashes: u32, bitmap: &[u8]) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.put_u64(bits);
        payload.put_u32(hashes);
        for k in 1..=4_u64 {
            payload.put_u64(k);
        }
        payload.put_u32(bitmap.len() as u32);
        payload.extend_from_slice(bitmap);
        snapshot::encode(SnapshotKind::BloomFilter, &payload)
    }

    #[tokio::test]
    async fn test_restore_rejects_inconsistent_sizes() {
        let filter = users_filter();
        filter.add(b"alice").await;

        let cases = vec![
            bloom_snapshot(u64::MAX, 7, &[]),
            bloom_snapshot(u64::MAX - 3, 7, &[0; 16]),
            // more bits than the bitmap holds
            bloom_snapshot(9586, 7, &[0; 8]),
            bloom_snapshot(9586, 7, &vec![0; 1198]),
            bloom_snapshot(9586, 7, &vec![0; 1200]),
            bloom_snapshot(9586, 0, &vec![0; 1199]),
        ];
        for case in cases {
            match filter.restore(&case).await {
                Err(SketchError::Deserialization(_)) => {}
                other => panic!("unexpected: {:?}", other),
            }
        }
        assert!(filter.exists(b"alice").await);

        // a well formed snapshot of the same tuning is accepted
        filter
            .restore(&bloom_snapshot(9586, 7, &vec![0; 1199]))
            .await
            .unwrap();
        assert!(!filter.exists(b"alice").await);
    }

    #[test]
    fn test_new_rejects_oversized_filter() {
        let d = FilterDescriptor {
            filter_type: FilterType::Embedded,
            key: "k".to_string(),
            max_cardinality: u64::MAX,
            max_fp: 0.01,
            hash_func_num: 7,
            hash_func_type: "sip13".to_string(),
        };
        assert!(matches!(
            EmbeddedFilter::new(d.clone()),
            Err(SketchError::InvalidParameters(_))
        ));

        let d = FilterDescriptor {
            max_cardinality: 10_000_000_000,
            ..d
        };
        assert!(matches!(
            EmbeddedFilter::new(d),
            Err(SketchError::InvalidParameters(_))
        ));
        assert!(matches!(
            FilterDescriptor::new(FilterType::Embedded, "k", u64::MAX, 0.01),
            Err(SketchError::InvalidParameters(_))
        ));
    }

    #[tokio::test]
    async fn test_restore_rejects_other_tuning() {
        let small = EmbeddedFilter::new(
            FilterDescriptor::new(FilterType::Embedded, "users", 10, 0.01).unwrap(),
        )
        .unwrap();
        let data = small.serialize().await.unwrap();

        let filter = users_filter();
        assert!(matches!(
            filter.restore(&data).await,
            Err(SketchError::Deserialization(_))
        ));
    }

    #[test]
    fn test_no_false_negatives() {
        fn prop(values: Vec<Vec<u8>>) -> bool {
            let rt = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();
            rt.block_on(async {
                let d = FilterDescriptor::new(FilterType::Embedded, "qc", 500, 0.05).unwrap();
                let filter = EmbeddedFilter::new(d).unwrap();
                for v in &values {
                    filter.add(v).await;
                }
                for v in &values {
                    if !filter.exists(v).await {
                        return false;
                    }
                }
                true
            })
        }
        quickcheck(prop as fn(Vec<Vec<u8>>) -> bool);
    }
}

// Exact nearest-neighbour index over squared Euclidean distance
//
// File layout (little-endian):
//   magic "RIDX" | version u16 | dimension u32 | count u64 | generation u64 | count*dimension f32


use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::IndexError;

pub const INDEX_MAGIC: [u8; 4] = *b"RIDX";
pub const INDEX_FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = 4 + 2 + 4 + 8 + 8;
const STAGING_SUFFIX: &str = ".tmp";

#[derive(Debug, Error)]
pub enum VectorIndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Not an index file (bad magic)")]
    BadMagic,
    #[error("Unsupported index format version {0}")]
    UnsupportedVersion(u16),
    #[error("Index file truncated: expected {expected} bytes of vectors, found {actual}")]
    Truncated { expected: u64, actual: u64 },
    #[error("Vector dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Index dimension must be positive")]
    ZeroDimension,
}

impl From<VectorIndexError> for IndexError {
    #[inline]
    fn from(err: VectorIndexError) -> Self {
        match err {
            VectorIndexError::Io(e) => IndexError::Io(e),
            other => IndexError::DataConsistency(other.to_string()),
        }
    }
}

/// One search hit: distance to the query and the vector's insertion position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub distance: f32,
    pub position: usize,
}

/// Vectors of one dimension stored contiguously in insertion order
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimension: usize,
    generation: u64,
    data: Vec<f32>,
}

impl FlatIndex {
    #[inline]
    pub fn new(dimension: usize) -> Result<Self, VectorIndexError> {
        if dimension == 0 {
            return Err(VectorIndexError::ZeroDimension);
        }
        Ok(Self {
            dimension,
            generation: 0,
            data: Vec::new(),
        })
    }

    #[inline]
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Build generation this index was written for
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() / self.dimension
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append a vector; its position is the previous `len()`
    #[inline]
    pub fn add(&mut self, vector: &[f32]) -> Result<usize, VectorIndexError> {
        self.check_dimension(vector)?;
        let position = self.len();
        self.data.extend_from_slice(vector);
        Ok(position)
    }

    #[inline]
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        self.data.chunks_exact(self.dimension).nth(position)
    }

    /// The `k` nearest vectors by squared L2 distance, closest first; ties go
    /// to the lower position
    #[inline]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, VectorIndexError> {
        self.check_dimension(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut neighbors: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, vector)| Neighbor {
                distance: squared_l2(query, vector),
                position,
            })
            .collect();

        neighbors.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.position.cmp(&b.position))
        });
        neighbors.truncate(k);
        Ok(neighbors)
    }

    #[inline]
    pub fn write(&self, path: &Path) -> Result<(), VectorIndexError> {
        let mut writer = BufWriter::new(File::create(path)?);

        writer.write_all(&INDEX_MAGIC)?;
        writer.write_all(&INDEX_FORMAT_VERSION.to_le_bytes())?;
        writer.write_all(&u32::try_from(self.dimension).unwrap_or(u32::MAX).to_le_bytes())?;
        writer.write_all(&(self.len() as u64).to_le_bytes())?;
        writer.write_all(&self.generation.to_le_bytes())?;
        for value in &self.data {
            writer.write_all(&value.to_le_bytes())?;
        }

        writer.flush()?;
        writer.get_ref().sync_all()?;

        debug!(
            "Wrote index with {} vectors of dimension {} to {}",
            self.len(),
            self.dimension,
            path.display()
        );
        Ok(())
    }

    #[inline]
    pub fn read(path: &Path) -> Result<Self, VectorIndexError> {
        let mut reader = BufReader::new(File::open(path)?);

        let mut header = [0_u8; HEADER_LEN];
        reader.read_exact(&mut header)?;

        let (magic, rest) = header.split_at(4);
        if magic != INDEX_MAGIC {
            return Err(VectorIndexError::BadMagic);
        }
        let (version, rest) = rest.split_at(2);
        let version = u16::from_le_bytes(fixed(version));
        if version != INDEX_FORMAT_VERSION {
            return Err(VectorIndexError::UnsupportedVersion(version));
        }
        let (dimension, rest) = rest.split_at(4);
        let (count, generation) = rest.split_at(8);

        let dimension = u32::from_le_bytes(fixed(dimension)) as usize;
        let count = u64::from_le_bytes(fixed(count));
        let generation = u64::from_le_bytes(fixed(generation));
        if dimension == 0 {
            return Err(VectorIndexError::ZeroDimension);
        }

        let mut payload = Vec::new();
        reader.read_to_end(&mut payload)?;
        let actual = payload.len() as u64;
        let expected = count
            .checked_mul(dimension as u64)
            .and_then(|values| values.checked_mul(4))
            .ok_or(VectorIndexError::Truncated {
                expected: u64::MAX,
                actual,
            })?;
        if actual != expected {
            return Err(VectorIndexError::Truncated { expected, actual });
        }

        let data = payload
            .chunks_exact(4)
            .map(|bytes| f32::from_le_bytes(fixed(bytes)))
            .collect();

        Ok(Self {
            dimension,
            generation,
            data,
        })
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), VectorIndexError> {
        if vector.len() != self.dimension {
            return Err(VectorIndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

/// Sibling path generation `generation` is staged at before being renamed over `path`
#[inline]
pub fn staging_path(path: &Path, generation: u64) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{generation}{STAGING_SUFFIX}"));
    path.with_file_name(name)
}

/// Whether `candidate` is a staging file for the index at `path`
#[inline]
pub fn is_staging_path(path: &Path, candidate: &Path) -> bool {
    let (Some(name), Some(candidate_name)) = (
        path.file_name().and_then(|n| n.to_str()),
        candidate.file_name().and_then(|n| n.to_str()),
    ) else {
        return false;
    };
    if candidate.parent() != path.parent() {
        return false;
    }

    candidate_name
        .strip_prefix(name)
        .and_then(|rest| rest.strip_prefix('.'))
        .and_then(|rest| rest.strip_suffix(STAGING_SUFFIX))
        .is_some_and(|generation| generation.parse::<u64>().is_ok())
}

#[inline]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}

fn fixed<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0_u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

//! HRIR sphere datasets
//!
//! A sphere of measured head-related impulse responses, triangulated so the
//! binaural decoder can interpolate between measurements with barycentric
//! weights. Spheres load from `.amir` assets; a synthetic sphere is
//! available when no measured dataset is configured.

use crate::error::{SpatialError, SpatialResult};
use crate::position::Position3D;

/// Magic bytes opening an `.amir` asset
const AMIR_MAGIC: [u8; 4] = *b"AMIR";

/// Highest understood `.amir` version
const AMIR_MAX_VERSION: u16 = 1;

/// Left/right impulse response pair with onset delays
#[derive(Debug, Clone)]
pub struct HrirPair {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    pub left_delay: f32,
    pub right_delay: f32,
}

impl HrirPair {
    pub fn new(left: Vec<f32>, right: Vec<f32>) -> Self {
        Self { left, right, left_delay: 0.0, right_delay: 0.0 }
    }

    pub fn length(&self) -> usize {
        self.left.len()
    }

    /// Linear interpolation toward another pair
    pub fn lerp(&self, other: &Self, t: f32) -> Self {
        let mix = |a: &[f32], b: &[f32]| -> Vec<f32> {
            a.iter().zip(b.iter()).map(|(&x, &y)| x + (y - x) * t).collect()
        };
        Self {
            left: mix(&self.left, &other.left),
            right: mix(&self.right, &other.right),
            left_delay: self.left_delay + (other.left_delay - self.left_delay) * t,
            right_delay: self.right_delay + (other.right_delay - self.right_delay) * t,
        }
    }
}

/// One measured point on the sphere
#[derive(Debug, Clone)]
pub struct HrirVertex {
    pub position: Position3D,
    pub hrir: HrirPair,
}

/// Sampling strategy for sphere lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SphereSampling {
    /// Closest measured vertex
    Nearest,
    /// Barycentric blend over the containing triangle
    #[default]
    Triangulated,
}

/// Triangulated sphere of HRIR measurements
#[derive(Debug, Clone)]
pub struct HrirSphere {
    vertices: Vec<HrirVertex>,
    triangles: Vec<[u32; 3]>,
    sample_rate: u32,
    ir_length: usize,
    sampling: SphereSampling,
}

/// Little-endian reader over an `.amir` byte stream
struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, n: usize) -> SpatialResult<&'a [u8]> {
        if self.offset + n > self.data.len() {
            return Err(SpatialError::InvalidHrirAsset("unexpected end of data".into()));
        }
        let slice = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    fn u16(&mut self) -> SpatialResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> SpatialResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32(&mut self) -> SpatialResult<f32> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32_vec(&mut self, count: usize) -> SpatialResult<Vec<f32>> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.f32()?);
        }
        Ok(out)
    }
}

impl HrirSphere {
    /// Parse an `.amir` asset from memory.
    pub fn from_bytes(data: &[u8]) -> SpatialResult<Self> {
        let mut r = Reader::new(data);

        if r.take(4)? != AMIR_MAGIC {
            return Err(SpatialError::InvalidHrirAsset("bad magic".into()));
        }

        let version = r.u16()?;
        if version == 0 || version > AMIR_MAX_VERSION {
            return Err(SpatialError::InvalidHrirAsset(format!("unsupported version {version}")));
        }

        let sample_rate = r.u32()?;
        let ir_length = r.u32()? as usize;
        let vertex_count = r.u32()? as usize;
        let index_count = r.u32()? as usize;

        if sample_rate == 0 || ir_length == 0 || vertex_count == 0 {
            return Err(SpatialError::InvalidHrirAsset("empty dataset".into()));
        }
        if index_count % 3 != 0 {
            return Err(SpatialError::InvalidHrirAsset("index count not a triangle list".into()));
        }

        let mut triangles = Vec::with_capacity(index_count / 3);
        for _ in 0..index_count / 3 {
            let tri = [r.u32()?, r.u32()?, r.u32()?];
            if tri.iter().any(|&i| i as usize >= vertex_count) {
                return Err(SpatialError::InvalidHrirAsset("triangle index out of range".into()));
            }
            triangles.push(tri);
        }

        let mut vertices = Vec::with_capacity(vertex_count);
        for _ in 0..vertex_count {
            let position = Position3D::new(r.f32()?, r.f32()?, r.f32()?);
            let left = r.f32_vec(ir_length)?;
            let right = r.f32_vec(ir_length)?;
            let left_delay = r.f32()?;
            let right_delay = r.f32()?;
            vertices.push(HrirVertex {
                position,
                hrir: HrirPair { left, right, left_delay, right_delay },
            });
        }

        Ok(Self {
            vertices,
            triangles,
            sample_rate,
            ir_length,
            sampling: SphereSampling::default(),
        })
    }

    /// Load an `.amir` asset from disk.
    pub fn from_file(path: &std::path::Path) -> SpatialResult<Self> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    /// Build a synthetic sphere from a simple ITD/ILD head model.
    ///
    /// Vertices sit on a latitude/longitude grid; adjacent grid cells are
    /// split into two triangles.
    pub fn synthetic(sample_rate: u32) -> Self {
        const AZ_STEP: i32 = 15;
        const EL_STEP: i32 = 15;
        const IR_LENGTH: usize = 64;

        let mut vertices = Vec::new();
        let mut rows = Vec::new();

        let mut el = -60;
        while el <= 60 {
            let mut row = Vec::new();
            let mut az = -180;
            while az < 180 {
                let position = Position3D::from_spherical(az as f32, el as f32, 1.0);
                row.push(vertices.len() as u32);
                vertices.push(HrirVertex {
                    position,
                    hrir: synthetic_hrir(az as f32, el as f32, IR_LENGTH, sample_rate),
                });
                az += AZ_STEP;
            }
            rows.push(row);
            el += EL_STEP;
        }

        let mut triangles = Vec::new();
        for r in 0..rows.len() - 1 {
            let row = &rows[r];
            let next = &rows[r + 1];
            for c in 0..row.len() {
                let c2 = (c + 1) % row.len();
                triangles.push([row[c], row[c2], next[c]]);
                triangles.push([row[c2], next[c2], next[c]]);
            }
        }

        log::debug!("synthetic HRIR sphere: {} vertices, {} triangles", vertices.len(), triangles.len());

        Self {
            vertices,
            triangles,
            sample_rate,
            ir_length: IR_LENGTH,
            sampling: SphereSampling::default(),
        }
    }

    pub fn set_sampling(&mut self, sampling: SphereSampling) {
        self.sampling = sampling;
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn ir_length(&self) -> usize {
        self.ir_length
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Look up the HRIR pair for a direction (unit vector not required).
    pub fn sample(&self, direction: &Position3D) -> HrirPair {
        let dir = direction.normalize();
        match self.sampling {
            SphereSampling::Nearest => self.sample_nearest(&dir),
            SphereSampling::Triangulated => self.sample_triangulated(&dir),
        }
    }

    fn sample_nearest(&self, dir: &Position3D) -> HrirPair {
        let mut best = 0;
        let mut best_dot = f32::NEG_INFINITY;
        for (i, v) in self.vertices.iter().enumerate() {
            let d = v.position.normalize().dot(dir);
            if d > best_dot {
                best_dot = d;
                best = i;
            }
        }
        self.vertices[best].hrir.clone()
    }

    fn sample_triangulated(&self, dir: &Position3D) -> HrirPair {
        use nalgebra::Matrix3;

        let target = dir.vector();

        for tri in &self.triangles {
            let a = self.vertices[tri[0] as usize].position;
            let b = self.vertices[tri[1] as usize].position;
            let c = self.vertices[tri[2] as usize].position;

            let m = Matrix3::from_columns(&[a.vector(), b.vector(), c.vector()]);

            let Some(inverse) = m.try_inverse() else { continue };
            let weights = inverse * target;

            const TOLERANCE: f32 = -1e-4;
            if weights.x >= TOLERANCE && weights.y >= TOLERANCE && weights.z >= TOLERANCE {
                let sum = weights.x + weights.y + weights.z;
                if sum <= f32::EPSILON {
                    continue;
                }
                return self.blend(tri, [weights.x / sum, weights.y / sum, weights.z / sum]);
            }
        }

        // Direction outside every triangle (degenerate mesh), fall back
        self.sample_nearest(dir)
    }

    fn blend(&self, tri: &[u32; 3], weights: [f32; 3]) -> HrirPair {
        let mut left = vec![0.0f32; self.ir_length];
        let mut right = vec![0.0f32; self.ir_length];
        let mut left_delay = 0.0;
        let mut right_delay = 0.0;

        for (&index, &w) in tri.iter().zip(weights.iter()) {
            let hrir = &self.vertices[index as usize].hrir;
            for (dst, &src) in left.iter_mut().zip(hrir.left.iter()) {
                *dst += src * w;
            }
            for (dst, &src) in right.iter_mut().zip(hrir.right.iter()) {
                *dst += src * w;
            }
            left_delay += hrir.left_delay * w;
            right_delay += hrir.right_delay * w;
        }

        HrirPair { left, right, left_delay, right_delay }
    }
}

/// Simple ITD/ILD head model for one direction
fn synthetic_hrir(azimuth: f32, elevation: f32, length: usize, sample_rate: u32) -> HrirPair {
    let az_rad = azimuth.to_radians();
    let el_rad = elevation.to_radians();

    // ITD from a spherical head model
    let head_radius = 0.0875; // meters
    let speed_of_sound = 343.0; // m/s
    let itd_seconds = (head_radius / speed_of_sound) * (az_rad.sin() + az_rad);
    let itd_samples = (itd_seconds * sample_rate as f32).abs();

    // ILD via constant-power weighting
    let pan = az_rad.sin() * el_rad.cos();
    let left_gain = ((1.0 + pan) * 0.25 * std::f32::consts::PI).cos();
    let right_gain = ((1.0 + pan) * 0.25 * std::f32::consts::PI).sin();

    let left_delay = if pan > 0.0 { itd_samples } else { 0.0 };
    let right_delay = if pan < 0.0 { itd_samples } else { 0.0 };

    let mut left = vec![0.0f32; length];
    let mut right = vec![0.0f32; length];

    // Gaussian-windowed impulses at the delayed onsets
    let sigma = 2.0f32;
    for i in 0..length {
        let t = i as f32;
        let ld = t - left_delay;
        let rd = t - right_delay;
        left[i] = left_gain * (-ld * ld / (2.0 * sigma * sigma)).exp();
        right[i] = right_gain * (-rd * rd / (2.0 * sigma * sigma)).exp();
    }

    HrirPair { left, right, left_delay, right_delay }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_test_asset() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"AMIR");
        data.extend_from_slice(&1u16.to_le_bytes()); // version
        data.extend_from_slice(&48000u32.to_le_bytes()); // sample rate
        data.extend_from_slice(&4u32.to_le_bytes()); // ir length
        data.extend_from_slice(&3u32.to_le_bytes()); // vertices
        data.extend_from_slice(&3u32.to_le_bytes()); // indices
        for i in [0u32, 1, 2] {
            data.extend_from_slice(&i.to_le_bytes());
        }
        let positions = [(1.0f32, 0.0f32, 0.0f32), (0.0, 1.0, 0.0), (0.0, 0.0, 1.0)];
        for (x, y, z) in positions {
            for v in [x, y, z] {
                data.extend_from_slice(&v.to_le_bytes());
            }
            for v in [1.0f32, 0.0, 0.0, 0.0] {
                data.extend_from_slice(&v.to_le_bytes()); // left ir
            }
            for v in [0.5f32, 0.0, 0.0, 0.0] {
                data.extend_from_slice(&v.to_le_bytes()); // right ir
            }
            data.extend_from_slice(&0.0f32.to_le_bytes()); // left delay
            data.extend_from_slice(&0.0f32.to_le_bytes()); // right delay
        }
        data
    }

    #[test]
    fn test_parse_asset() {
        let sphere = HrirSphere::from_bytes(&write_test_asset()).unwrap();
        assert_eq!(sphere.sample_rate(), 48000);
        assert_eq!(sphere.ir_length(), 4);
        assert_eq!(sphere.vertex_count(), 3);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut data = write_test_asset();
        data[0] = b'X';
        assert!(HrirSphere::from_bytes(&data).is_err());
    }

    #[test]
    fn test_truncated_rejected() {
        let data = write_test_asset();
        assert!(HrirSphere::from_bytes(&data[..data.len() - 8]).is_err());
    }

    #[test]
    fn test_barycentric_at_vertex() {
        let sphere = HrirSphere::from_bytes(&write_test_asset()).unwrap();
        let pair = sphere.sample(&Position3D::new(1.0, 0.0, 0.0));
        assert!((pair.left[0] - 1.0).abs() < 1e-4);
        assert!((pair.right[0] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_synthetic_sphere_ild() {
        let sphere = HrirSphere::synthetic(48000);
        assert!(sphere.vertex_count() > 100);

        // A source on the left is louder in the left ear
        let left_src = sphere.sample(&Position3D::from_spherical(-90.0, 0.0, 1.0));
        let left_energy: f32 = left_src.left.iter().map(|x| x * x).sum();
        let right_energy: f32 = left_src.right.iter().map(|x| x * x).sum();
        assert!(left_energy > right_energy);
    }
}

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageGeometry {
    pub width: u32,
    pub height: u32,
    pub channel_count: u8,
    pub bytes_per_channel: u8,
}

impl ImageGeometry {
    pub fn new(width: u32, height: u32, channel_count: u8, bytes_per_channel: u8) -> Self {
        Self {
            width,
            height,
            channel_count,
            bytes_per_channel,
        }
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn bytes_per_pixel(&self) -> u64 {
        self.channel_count as u64 * self.bytes_per_channel as u64
    }

    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.bytes_per_pixel() as usize
    }

    /// Uncompressed sample bytes of the whole image.
    pub fn raw_bytes(&self) -> u64 {
        self.pixel_count() * self.bytes_per_pixel()
    }
}

/// A contiguous band of full-width rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelRegion {
    pub width: u32,
    pub rows: u32,
    pub channel_count: u8,
    pub bytes_per_channel: u8,
    pub data: Vec<u8>,
}

impl PixelRegion {
    pub fn new(
        width: u32,
        rows: u32,
        channel_count: u8,
        bytes_per_channel: u8,
        data: Vec<u8>,
    ) -> Result<Self> {
        let expected =
            width as usize * rows as usize * channel_count as usize * bytes_per_channel as usize;
        if data.len() != expected {
            bail!(
                "region buffer has {} bytes, expected {} for {}x{}x{}",
                data.len(),
                expected,
                width,
                rows,
                channel_count
            );
        }
        Ok(Self {
            width,
            rows,
            channel_count,
            bytes_per_channel,
            data,
        })
    }

    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.channel_count as usize * self.bytes_per_channel as usize
    }

    pub fn row(&self, index: u32) -> &[u8] {
        let stride = self.row_bytes();
        let start = index as usize * stride;
        &self.data[start..start + stride]
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn geometry(&self) -> ImageGeometry {
        ImageGeometry::new(
            self.width,
            self.rows,
            self.channel_count,
            self.bytes_per_channel,
        )
    }
}

/// Read-only access to one image (or one page of a multi-page source).
pub trait InputSource: Send + Sync {
    fn geometry(&self) -> ImageGeometry;

    /// Returns rows `[start_row, start_row + rows)` as an owned region.
    fn read_rows(&self, start_row: u32, rows: u32) -> Result<PixelRegion>;
}

/// Fully decoded raster held in memory.
#[derive(Debug, Clone)]
pub struct RasterSource {
    geometry: ImageGeometry,
    data: Vec<u8>,
}

impl RasterSource {
    pub fn new(geometry: ImageGeometry, data: Vec<u8>) -> Result<Self> {
        if data.len() as u64 != geometry.raw_bytes() {
            bail!(
                "raster buffer has {} bytes, expected {}",
                data.len(),
                geometry.raw_bytes()
            );
        }
        Ok(Self { geometry, data })
    }

    pub fn from_region(region: PixelRegion) -> Self {
        Self {
            geometry: region.geometry(),
            data: region.data,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl InputSource for RasterSource {
    fn geometry(&self) -> ImageGeometry {
        self.geometry
    }

    fn read_rows(&self, start_row: u32, rows: u32) -> Result<PixelRegion> {
        let end = start_row as u64 + rows as u64;
        if rows == 0 || end > self.geometry.height as u64 {
            bail!(
                "row range {}..{} outside image height {}",
                start_row,
                end,
                self.geometry.height
            );
        }
        let stride = self.geometry.row_bytes();
        let from = start_row as usize * stride;
        let to = end as usize * stride;
        PixelRegion::new(
            self.geometry.width,
            rows,
            self.geometry.channel_count,
            self.geometry.bytes_per_channel,
            self.data[from..to].to_vec(),
        )
    }
}

use std::{fs::File, io::BufWriter, path::Path};

use image::{codecs::jpeg::JpegEncoder, ColorType};
use rewind_types::{
    frame::{Frame, PixelFormat},
    Result,
};
use tracing::debug;

use crate::encode_error;

/// Write `frame` to `path` as a JPEG at the given quality.
pub fn write_jpeg_thumbnail(frame: &Frame, path: &Path, quality: u8) -> Result<()> {
    if frame.is_empty() {
        return Err(encode_error("cannot build a thumbnail from an empty frame"));
    }
    let size = frame.size();
    let rgb: Vec<u8> = match frame.format() {
        PixelFormat::Rgb24 => frame.data()[..size.byte_len(PixelFormat::Rgb24)].to_vec(),
        PixelFormat::Rgba8 => frame
            .data()
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect(),
    };

    let file = File::create(path)
        .map_err(|err| encode_error(format!("create {} failed: {err}", path.display())))?;
    let mut out = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode(&rgb, size.width, size.height, ColorType::Rgb8)
        .map_err(|err| encode_error(format!("thumbnail encode failed: {err}")))?;
    debug!("Thumbnail written to {} at quality {quality}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewind_types::frame::FrameSize;

    #[test]
    fn writes_decodable_jpeg() {
        let size = FrameSize::new(8, 6);
        let frame = Frame::new(
            size,
            PixelFormat::Rgba8,
            vec![200; size.byte_len(PixelFormat::Rgba8)],
            1,
        );
        let path = std::env::temp_dir().join(format!("rewind-thumb-{}.jpg", std::process::id()));
        write_jpeg_thumbnail(&frame, &path, 85).unwrap();

        let decoded = image::open(&path).expect("decode jpeg");
        assert_eq!(decoded.width(), 8);
        assert_eq!(decoded.height(), 6);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn empty_frame_is_rejected() {
        let path = std::env::temp_dir().join("rewind-thumb-empty.jpg");
        assert!(write_jpeg_thumbnail(&Frame::empty(), &path, 85).is_err());
        assert!(!path.exists());
    }
}

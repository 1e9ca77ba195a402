//! ISO base media (MP4/MOV) header reader.
//!
//! Only the `moov` box is loaded. From it we take the movie duration
//! (`mvhd`) and, for the first video track (`hdlr` type `vide`), the natural
//! size and the rotation encoded in the `tkhd` transformation matrix.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{Result, ShareBridgeError};

use super::{VideoMetadataReader, VideoTrackInfo};

const MAX_MOOV_SIZE: u64 = 64 * 1024 * 1024;
/// 1.0 in 16.16 fixed point.
const FIXED_ONE: i32 = 0x10000;

#[derive(Debug, Default, Clone, Copy)]
pub struct Mp4MetadataReader;

impl VideoMetadataReader for Mp4MetadataReader {
    fn read(&self, path: &Path) -> Result<VideoTrackInfo> {
        let mut file = File::open(path)?;
        let moov = find_moov(&mut file)?;
        Ok(parse_moov(&moov))
    }
}

fn malformed(msg: &str) -> ShareBridgeError {
    ShareBridgeError::Probe(format!("malformed mp4: {}", msg))
}

fn find_moov<R: Read + Seek>(reader: &mut R) -> Result<Vec<u8>> {
    loop {
        let mut header = [0u8; 8];
        match reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Err(malformed("no moov box")),
            Err(e) => return Err(e.into()),
        }
        let size32 = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let kind = [header[4], header[5], header[6], header[7]];

        // None: the box runs to the end of the file.
        let (size, header_len) = match size32 {
            0 => (None, 8u64),
            1 => {
                let mut large = [0u8; 8];
                reader.read_exact(&mut large)?;
                (Some(u64::from_be_bytes(large)), 16u64)
            }
            n => (Some(u64::from(n)), 8u64),
        };

        if &kind == b"moov" {
            let mut body = Vec::new();
            match size {
                Some(size) => {
                    let body_len = size
                        .checked_sub(header_len)
                        .ok_or_else(|| malformed("moov smaller than its header"))?;
                    if body_len > MAX_MOOV_SIZE {
                        return Err(malformed("moov box too large"));
                    }
                    body.resize(body_len as usize, 0);
                    reader.read_exact(&mut body)?;
                }
                None => {
                    reader.by_ref().take(MAX_MOOV_SIZE).read_to_end(&mut body)?;
                }
            }
            return Ok(body);
        }

        let Some(size) = size else {
            return Err(malformed("no moov box"));
        };
        let skip = size
            .checked_sub(header_len)
            .ok_or_else(|| malformed("box smaller than its header"))?;
        let skip = i64::try_from(skip).map_err(|_| malformed("box too large"))?;
        reader.seek(SeekFrom::Current(skip))?;
    }
}

/// Child boxes of an in-memory container. Stops at the first malformed box.
struct Boxes<'a> {
    data: &'a [u8],
}

fn boxes(data: &[u8]) -> Boxes<'_> {
    Boxes { data }
}

impl<'a> Iterator for Boxes<'a> {
    type Item = ([u8; 4], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let data = self.data;
        if data.len() < 8 {
            return None;
        }
        let size32 = be_u32(data, 0)?;
        let kind = [data[4], data[5], data[6], data[7]];
        let (header_len, size) = match size32 {
            0 => (8usize, data.len()),
            1 => (16usize, usize::try_from(be_u64(data, 8)?).ok()?),
            n => (8usize, n as usize),
        };
        if size < header_len || size > data.len() {
            self.data = &[];
            return None;
        }
        self.data = &data[size..];
        Some((kind, &data[header_len..size]))
    }
}

fn be_u32(data: &[u8], at: usize) -> Option<u32> {
    let bytes = data.get(at..at + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn be_i32(data: &[u8], at: usize) -> Option<i32> {
    be_u32(data, at).map(|v| v as i32)
}

fn be_u64(data: &[u8], at: usize) -> Option<u64> {
    let bytes = data.get(at..at + 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Some(u64::from_be_bytes(buf))
}

#[derive(Debug, Clone, Copy)]
struct TrackHeader {
    width: u32,
    height: u32,
    rotation: u32,
}

fn parse_moov(moov: &[u8]) -> VideoTrackInfo {
    let mut info = VideoTrackInfo::default();
    let mut video: Option<TrackHeader> = None;

    for (kind, body) in boxes(moov) {
        match &kind {
            b"mvhd" => info.duration_ms = parse_mvhd(body),
            b"trak" if video.is_none() => video = parse_video_trak(body),
            _ => {}
        }
    }

    if let Some(track) = video {
        info.width = Some(track.width).filter(|w| *w > 0);
        info.height = Some(track.height).filter(|h| *h > 0);
        info.rotation = track.rotation;
    }
    info
}

fn parse_mvhd(body: &[u8]) -> Option<u64> {
    let version = *body.first()?;
    let (timescale, duration) = if version == 1 {
        let duration = be_u64(body, 24)?;
        (be_u32(body, 20)?, (duration != u64::MAX).then_some(duration)?)
    } else {
        let duration = be_u32(body, 16)?;
        (be_u32(body, 12)?, (duration != u32::MAX).then_some(u64::from(duration))?)
    };
    if timescale == 0 {
        return None;
    }
    let millis = u128::from(duration) * 1000 / u128::from(timescale);
    u64::try_from(millis).ok()
}

fn parse_video_trak(trak: &[u8]) -> Option<TrackHeader> {
    let mut header = None;
    let mut handler = None;

    for (kind, body) in boxes(trak) {
        match &kind {
            b"tkhd" => header = parse_tkhd(body),
            b"mdia" => {
                handler = boxes(body)
                    .find(|(k, _)| k == b"hdlr")
                    .and_then(|(_, hdlr)| hdlr.get(8..12))
                    .map(|t| [t[0], t[1], t[2], t[3]]);
            }
            _ => {}
        }
    }

    let header = header?;
    match handler {
        Some(kind) if &kind == b"vide" => Some(header),
        // no handler: accept any track with a visual size
        None if header.width > 0 && header.height > 0 => Some(header),
        _ => None,
    }
}

fn parse_tkhd(body: &[u8]) -> Option<TrackHeader> {
    let matrix_at = if *body.first()? == 1 { 52 } else { 40 };
    let a = be_i32(body, matrix_at)?;
    let b = be_i32(body, matrix_at + 4)?;
    let width = be_u32(body, matrix_at + 36)? >> 16;
    let height = be_u32(body, matrix_at + 40)? >> 16;
    Some(TrackHeader {
        width,
        height,
        rotation: rotation_from_matrix(a, b),
    })
}

fn rotation_from_matrix(a: i32, b: i32) -> u32 {
    match (a, b) {
        (0, FIXED_ONE) => 90,
        (0, b) if b == -FIXED_ONE => 270,
        (a, 0) if a == -FIXED_ONE => 180,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn bx(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = ((body.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(body);
        out
    }

    fn mvhd(timescale: u32, duration: u32) -> Vec<u8> {
        let mut body = vec![0u8; 100];
        body[12..16].copy_from_slice(&timescale.to_be_bytes());
        body[16..20].copy_from_slice(&duration.to_be_bytes());
        bx(b"mvhd", &body)
    }

    fn tkhd(width: u32, height: u32, a: i32, b: i32) -> Vec<u8> {
        let mut body = vec![0u8; 84];
        body[40..44].copy_from_slice(&a.to_be_bytes());
        body[44..48].copy_from_slice(&b.to_be_bytes());
        body[76..80].copy_from_slice(&(width << 16).to_be_bytes());
        body[80..84].copy_from_slice(&(height << 16).to_be_bytes());
        bx(b"tkhd", &body)
    }

    fn trak(handler: &[u8; 4], tkhd: Vec<u8>) -> Vec<u8> {
        let mut hdlr = vec![0u8; 8];
        hdlr.extend_from_slice(handler);
        hdlr.extend_from_slice(&[0u8; 13]);
        let mdia = bx(b"mdia", &bx(b"hdlr", &hdlr));
        bx(b"trak", &[tkhd, mdia].concat())
    }

    fn movie(moov_children: Vec<Vec<u8>>) -> Vec<u8> {
        let ftyp = bx(b"ftyp", b"isom\0\0\0\0isomiso2");
        let mdat = bx(b"mdat", &[0u8; 64]);
        let moov = bx(b"moov", &moov_children.concat());
        [ftyp, mdat, moov].concat()
    }

    #[test]
    fn test_reads_portrait_video() {
        let data = movie(vec![
            mvhd(600, 2700),
            trak(b"soun", tkhd(0, 0, FIXED_ONE, 0)),
            trak(b"vide", tkhd(1920, 1080, 0, FIXED_ONE)),
        ]);
        let moov = find_moov(&mut Cursor::new(data)).unwrap();
        let info = parse_moov(&moov);

        assert_eq!(info.width, Some(1920));
        assert_eq!(info.height, Some(1080));
        assert_eq!(info.rotation, 90);
        assert_eq!(info.duration_ms, Some(4500));

        let meta = info.into_metadata();
        assert_eq!((meta.width, meta.height), (Some(1080), Some(1920)));
    }

    #[test]
    fn test_rotation_from_matrix() {
        assert_eq!(rotation_from_matrix(FIXED_ONE, 0), 0);
        assert_eq!(rotation_from_matrix(0, FIXED_ONE), 90);
        assert_eq!(rotation_from_matrix(-FIXED_ONE, 0), 180);
        assert_eq!(rotation_from_matrix(0, -FIXED_ONE), 270);
    }

    #[test]
    fn test_missing_moov_is_an_error() {
        let data = bx(b"ftyp", b"isom");
        assert!(find_moov(&mut Cursor::new(data)).is_err());
    }

    #[test]
    fn test_audio_only_movie_keeps_duration() {
        let data = movie(vec![mvhd(1000, 1234), trak(b"soun", tkhd(0, 0, FIXED_ONE, 0))]);
        let moov = find_moov(&mut Cursor::new(data)).unwrap();
        let info = parse_moov(&moov);
        assert_eq!(info.duration_ms, Some(1234));
        assert_eq!(info.width, None);
    }

    #[test]
    fn test_reader_on_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(
            &path,
            movie(vec![mvhd(1000, 10_000), trak(b"vide", tkhd(640, 480, FIXED_ONE, 0))]),
        )
        .unwrap();

        let info = Mp4MetadataReader.read(&path).unwrap();
        assert_eq!(info.width, Some(640));
        assert_eq!(info.height, Some(480));
        assert_eq!(info.rotation, 0);
        assert_eq!(info.duration_ms, Some(10_000));
    }
}

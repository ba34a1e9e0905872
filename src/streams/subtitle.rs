//! Subtitle events and their deep copy
//!
//! Subtitles cross the pipeline as decoded events rather than packets. The
//! fix-sub-duration heartbeat needs to duplicate the previous event so it
//! can re-submit it with a later presentation time; [`copy_subtitle`] is
//! that duplication.

use crate::error::{TransmuxError, TransmuxResult};

/// Size of a bitmap subtitle palette: 256 RGBA entries.
pub const PALETTE_SIZE: usize = 256 * 4;

/// Rendering form of one subtitle rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RectKind {
    None,
    /// Paletted image: plane 0 holds indices, plane 1 the palette.
    Bitmap,
    Text,
    Ass,
}

/// One positioned rectangle of a subtitle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleRect {
    pub kind: RectKind,
    pub flags: u32,
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    pub nb_colors: i32,
    /// Up to four data planes with their line sizes.
    pub data: [Option<Vec<u8>>; 4],
    pub linesize: [usize; 4],
    pub text: Option<String>,
    pub ass: Option<String>,
}

/// One decoded subtitle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subtitle {
    pub format: u16,
    pub start_display_time: u32,
    pub end_display_time: u32,
    /// Presentation time in microseconds.
    pub pts: Option<i64>,
    pub rects: Vec<SubtitleRect>,
}

/// Deep-copy a subtitle event.
///
/// Every plane is copied at its computed size: `h * linesize[j]`, except
/// plane 1 of a bitmap rect, which holds a palette and is copied at exactly
/// [`PALETTE_SIZE`] bytes. Sizing that plane from `linesize[1]` would
/// corrupt palettes. A source plane shorter than its computed size is
/// reported as an error.
pub fn copy_subtitle(src: &Subtitle) -> TransmuxResult<Subtitle> {
    let mut dst = Subtitle {
        format: src.format,
        start_display_time: src.start_display_time,
        end_display_time: src.end_display_time,
        pts: src.pts,
        rects: Vec::with_capacity(src.rects.len()),
    };

    for (rect_idx, rect) in src.rects.iter().enumerate() {
        let mut copy = SubtitleRect {
            kind: rect.kind,
            flags: rect.flags,
            x: rect.x,
            y: rect.y,
            w: rect.w,
            h: rect.h,
            nb_colors: rect.nb_colors,
            data: [None, None, None, None],
            linesize: [0; 4],
            text: rect.text.clone(),
            ass: rect.ass.clone(),
        };

        for plane in 0..4 {
            let Some(src_plane) = &rect.data[plane] else {
                continue;
            };
            let size = if rect.kind == RectKind::Bitmap && plane == 1 {
                PALETTE_SIZE
            } else {
                rect.h.max(0) as usize * rect.linesize[plane]
            };
            if src_plane.len() < size {
                return Err(TransmuxError::Subtitle {
                    message: format!(
                        "rect {} plane {} holds {} bytes, {} required",
                        rect_idx,
                        plane,
                        src_plane.len(),
                        size
                    ),
                });
            }
            copy.data[plane] = Some(src_plane[..size].to_vec());
            copy.linesize[plane] = rect.linesize[plane];
        }

        dst.rects.push(copy);
    }

    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitmap_subtitle() -> Subtitle {
        Subtitle {
            format: 0,
            start_display_time: 0,
            end_display_time: 2000,
            pts: Some(1_000_000),
            rects: vec![SubtitleRect {
                kind: RectKind::Bitmap,
                flags: 0,
                x: 10,
                y: 20,
                w: 64,
                h: 2,
                nb_colors: 16,
                data: [
                    Some(vec![7u8; 2 * 64]),
                    // palette plane carries extra slack on purpose
                    Some(vec![9u8; PALETTE_SIZE + 128]),
                    None,
                    None,
                ],
                linesize: [64, 0, 0, 0],
                text: None,
                ass: Some("Dialogue: test".to_string()),
            }],
        }
    }

    #[test]
    fn bitmap_palette_plane_copies_exactly_one_palette() {
        let src = bitmap_subtitle();
        let copy = copy_subtitle(&src).unwrap();
        let rect = &copy.rects[0];
        assert_eq!(rect.data[0].as_ref().unwrap().len(), 128);
        assert_eq!(rect.data[1].as_ref().unwrap().len(), PALETTE_SIZE);
        assert_eq!(rect.ass.as_deref(), Some("Dialogue: test"));
    }

    #[test]
    fn copy_is_idempotent() {
        let src = bitmap_subtitle();
        let once = copy_subtitle(&src).unwrap();
        let twice = copy_subtitle(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn text_rect_planes_size_from_linesize() {
        let sub = Subtitle {
            format: 1,
            start_display_time: 0,
            end_display_time: 500,
            pts: None,
            rects: vec![SubtitleRect {
                kind: RectKind::Text,
                flags: 0,
                x: 0,
                y: 0,
                w: 0,
                h: 3,
                nb_colors: 0,
                data: [Some(vec![1u8; 30]), None, None, None],
                linesize: [10, 0, 0, 0],
                text: Some("hello".to_string()),
                ass: None,
            }],
        };
        let copy = copy_subtitle(&sub).unwrap();
        assert_eq!(copy.rects[0].data[0].as_ref().unwrap().len(), 30);
        assert_eq!(copy.rects[0].text.as_deref(), Some("hello"));
    }

    #[test]
    fn undersized_plane_is_rejected() {
        let mut sub = bitmap_subtitle();
        sub.rects[0].data[1] = Some(vec![0u8; PALETTE_SIZE - 1]);
        assert!(copy_subtitle(&sub).is_err());
    }
}

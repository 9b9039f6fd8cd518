//! `StackMapTable` frames
//!
//! Frames are decoded to label positions so they follow their instructions
//! when the code is re-laid out, and are re-encoded with the most compact
//! frame type for the recomputed offset deltas.

use crate::encoder::{BytecodeReader, BytecodeWriter};
use crate::instruction::{CodeError, Label, LabelMap};

/// A verification type in a frame's locals or stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationType {
    /// Unusable slot
    Top,
    /// `int`
    Integer,
    /// `float`
    Float,
    /// `double` (one entry, two slots)
    Double,
    /// `long` (one entry, two slots)
    Long,
    /// `null`
    Null,
    /// `this` before the super constructor returns
    UninitializedThis,
    /// Initialized object of the Class entry at this pool index
    Object(u16),
    /// Result of the `NEW` instruction at this label, not yet constructed
    Uninitialized(Label),
}

/// One stack map frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackMapFrame {
    /// Same locals as the previous frame, empty stack
    Same {
        /// Frame position
        target: Label,
    },
    /// Same locals, one stack item
    SameLocals1StackItem {
        /// Frame position
        target: Label,
        /// The stack item
        stack: VerificationType,
    },
    /// Previous locals minus the last `count` (1-3)
    Chop {
        /// Frame position
        target: Label,
        /// Removed locals
        count: u8,
    },
    /// Previous locals plus 1-3 more
    Append {
        /// Frame position
        target: Label,
        /// Added locals
        locals: Vec<VerificationType>,
    },
    /// Complete description
    Full {
        /// Frame position
        target: Label,
        /// All locals
        locals: Vec<VerificationType>,
        /// All stack items
        stack: Vec<VerificationType>,
    },
}

impl StackMapFrame {
    /// Position of this frame
    pub fn target(&self) -> Label {
        match self {
            StackMapFrame::Same { target }
            | StackMapFrame::SameLocals1StackItem { target, .. }
            | StackMapFrame::Chop { target, .. }
            | StackMapFrame::Append { target, .. }
            | StackMapFrame::Full { target, .. } => *target,
        }
    }
}

fn decode_type(
    reader: &mut BytecodeReader<'_>,
    labels: &mut LabelMap,
) -> Result<VerificationType, CodeError> {
    let tag = reader.read_u8()?;
    Ok(match tag {
        0 => VerificationType::Top,
        1 => VerificationType::Integer,
        2 => VerificationType::Float,
        3 => VerificationType::Double,
        4 => VerificationType::Long,
        5 => VerificationType::Null,
        6 => VerificationType::UninitializedThis,
        7 => VerificationType::Object(reader.read_u16()?),
        8 => VerificationType::Uninitialized(labels.label_at(reader.read_u16()? as u32)),
        tag => return Err(CodeError::InvalidVerificationType(tag)),
    })
}

fn decode_types(
    reader: &mut BytecodeReader<'_>,
    labels: &mut LabelMap,
    count: usize,
) -> Result<Vec<VerificationType>, CodeError> {
    (0..count).map(|_| decode_type(reader, labels)).collect()
}

pub(crate) fn decode_frames(
    info: &[u8],
    labels: &mut LabelMap,
) -> Result<Vec<StackMapFrame>, CodeError> {
    let mut reader = BytecodeReader::new(info);
    let count = reader.read_u16()?;
    let mut frames = Vec::with_capacity(count as usize);
    let mut previous: Option<u32> = None;

    for _ in 0..count {
        let frame_type = reader.read_u8()?;
        let delta = match frame_type {
            0..=63 => frame_type as u32,
            64..=127 => (frame_type - 64) as u32,
            247..=255 => reader.read_u16()? as u32,
            _ => return Err(CodeError::InvalidFrame(frame_type)),
        };
        let offset = match previous {
            None => delta,
            Some(prev) => prev + delta + 1,
        };
        previous = Some(offset);
        let target = labels.label_at(offset);

        let frame = match frame_type {
            0..=63 | 251 => StackMapFrame::Same { target },
            64..=127 | 247 => StackMapFrame::SameLocals1StackItem {
                target,
                stack: decode_type(&mut reader, labels)?,
            },
            248..=250 => StackMapFrame::Chop {
                target,
                count: 251 - frame_type,
            },
            252..=254 => StackMapFrame::Append {
                target,
                locals: decode_types(&mut reader, labels, (frame_type - 251) as usize)?,
            },
            _ => {
                let locals_count = reader.read_u16()? as usize;
                let locals = decode_types(&mut reader, labels, locals_count)?;
                let stack_count = reader.read_u16()? as usize;
                let stack = decode_types(&mut reader, labels, stack_count)?;
                StackMapFrame::Full {
                    target,
                    locals,
                    stack,
                }
            }
        };
        frames.push(frame);
    }
    Ok(frames)
}

fn encode_type<F>(
    ty: &VerificationType,
    writer: &mut BytecodeWriter,
    resolve: &F,
) -> Result<(), CodeError>
where
    F: Fn(Label) -> Result<u32, CodeError>,
{
    match ty {
        VerificationType::Top => writer.emit_u8(0),
        VerificationType::Integer => writer.emit_u8(1),
        VerificationType::Float => writer.emit_u8(2),
        VerificationType::Double => writer.emit_u8(3),
        VerificationType::Long => writer.emit_u8(4),
        VerificationType::Null => writer.emit_u8(5),
        VerificationType::UninitializedThis => writer.emit_u8(6),
        VerificationType::Object(index) => {
            writer.emit_u8(7);
            writer.emit_u16(*index);
        }
        VerificationType::Uninitialized(label) => {
            writer.emit_u8(8);
            writer.emit_u16(resolve(*label)? as u16);
        }
    }
    Ok(())
}

pub(crate) fn encode_frames<F>(
    frames: &[StackMapFrame],
    writer: &mut BytecodeWriter,
    resolve: F,
) -> Result<(), CodeError>
where
    F: Fn(Label) -> Result<u32, CodeError>,
{
    writer.emit_u16(frames.len() as u16);
    let mut previous: Option<u32> = None;

    for frame in frames {
        let offset = resolve(frame.target())?;
        let delta = match previous {
            None => offset,
            Some(prev) if offset > prev => offset - prev - 1,
            Some(_) => return Err(CodeError::FrameOrder(offset)),
        };
        previous = Some(offset);
        let delta = u16::try_from(delta).map_err(|_| CodeError::FrameOrder(offset))?;

        match frame {
            StackMapFrame::Same { .. } if delta <= 63 => writer.emit_u8(delta as u8),
            StackMapFrame::Same { .. } => {
                writer.emit_u8(251);
                writer.emit_u16(delta);
            }
            StackMapFrame::SameLocals1StackItem { stack, .. } => {
                if delta <= 63 {
                    writer.emit_u8(64 + delta as u8);
                } else {
                    writer.emit_u8(247);
                    writer.emit_u16(delta);
                }
                encode_type(stack, writer, &resolve)?;
            }
            StackMapFrame::Chop { count, .. } => {
                writer.emit_u8(251 - count);
                writer.emit_u16(delta);
            }
            StackMapFrame::Append { locals, .. } => {
                writer.emit_u8(251 + locals.len() as u8);
                writer.emit_u16(delta);
                for ty in locals {
                    encode_type(ty, writer, &resolve)?;
                }
            }
            StackMapFrame::Full { locals, stack, .. } => {
                writer.emit_u8(255);
                writer.emit_u16(delta);
                writer.emit_u16(locals.len() as u16);
                for ty in locals {
                    encode_type(ty, writer, &resolve)?;
                }
                writer.emit_u16(stack.len() as u16);
                for ty in stack {
                    encode_type(ty, writer, &resolve)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_offsets_accumulate() {
        // same(3), same_locals_1(delta 2, int), chop 1 (delta 10)
        let info = [0x00, 0x03, 3, 64 + 2, 1, 250, 0x00, 10];
        let mut labels = LabelMap::default();
        let frames = decode_frames(&info, &mut labels).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(labels.offset_of(frames[0].target()), Some(3));
        assert_eq!(labels.offset_of(frames[1].target()), Some(6));
        assert_eq!(labels.offset_of(frames[2].target()), Some(17));
        assert_eq!(
            frames[1],
            StackMapFrame::SameLocals1StackItem {
                target: frames[1].target(),
                stack: VerificationType::Integer
            }
        );
    }

    #[test]
    fn test_encode_picks_compact_forms() {
        let mut labels = LabelMap::default();
        let a = labels.label_at(3);
        let b = labels.label_at(100);
        let frames = vec![
            StackMapFrame::Same { target: a },
            StackMapFrame::Same { target: b },
        ];
        let mut writer = BytecodeWriter::new();
        encode_frames(&frames, &mut writer, |l| {
            labels.offset_of(l).ok_or(CodeError::UnboundLabel(0))
        })
        .unwrap();
        assert_eq!(writer.buffer(), &[0x00, 0x02, 3, 251, 0x00, 96]);
    }

    #[test]
    fn test_invalid_frame_type() {
        let info = [0x00, 0x01, 200];
        let mut labels = LabelMap::default();
        assert!(matches!(
            decode_frames(&info, &mut labels),
            Err(CodeError::InvalidFrame(200))
        ));
    }
}

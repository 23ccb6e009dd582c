use crate::{FrameKey, OptimizerLink, PointKey};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum WindowError {
    #[error("frame {0:?} does not exist in the window")]
    UnknownFrame(FrameKey),
    #[error("point {0:?} does not exist in the window")]
    UnknownPoint(PointKey),
    #[error("frame {frame:?} is still linked to optimizer node {link:?}")]
    FrameLinked { frame: FrameKey, link: OptimizerLink },
    #[error("point {point:?} is still linked to optimizer node {link:?}")]
    PointLinked { point: PointKey, link: OptimizerLink },
    #[error("frame {frame:?} owns point {point:?} which is still linked to optimizer node {link:?}")]
    OwnedPointLinked {
        frame: FrameKey,
        point: PointKey,
        link: OptimizerLink,
    },
    #[error("pyramid level {level} expected {expected} pixels but got {actual}")]
    LevelSize {
        level: usize,
        expected: usize,
        actual: usize,
    },
    #[error("pattern of {0} samples exceeds the capacity of {}", crate::MAX_RES_PER_POINT)]
    PatternTooLong(usize),
    #[error("pattern has {colors} intensities but {weights} weights")]
    PatternMismatch { colors: usize, weights: usize },
    #[error("pattern of {actual} samples does not match the window pattern of {expected}")]
    PatternLength { expected: usize, actual: usize },
}

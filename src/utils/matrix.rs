use crate::buffer::TransformType;

/// Identity, for transforms that leave texture coordinates alone.
const IDENTITY: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Computes the 4x4 column-major texture-coordinate matrix for a buffer
/// transform.
///
/// Consumers sampling the last flushed buffer apply this matrix to `[s, t,
/// 0, 1]` texture coordinates so content rotated or flipped by the producer
/// shows upright. Rotations are counter-clockwise in texture space; the
/// flip variants mirror first, then rotate.
pub fn transform_matrix(transform: TransformType) -> [f32; 16] {
    match transform {
        TransformType::RotateNone => IDENTITY,
        TransformType::Rotate90 => [
            0.0, 1.0, 0.0, 0.0, //
            -1.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            1.0, 0.0, 0.0, 1.0,
        ],
        TransformType::Rotate180 => [
            -1.0, 0.0, 0.0, 0.0, //
            0.0, -1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            1.0, 1.0, 0.0, 1.0,
        ],
        TransformType::Rotate270 => [
            0.0, -1.0, 0.0, 0.0, //
            1.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 1.0, 0.0, 1.0,
        ],
        TransformType::FlipH => [
            -1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            1.0, 0.0, 0.0, 1.0,
        ],
        TransformType::FlipV => [
            1.0, 0.0, 0.0, 0.0, //
            0.0, -1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 1.0, 0.0, 1.0,
        ],
        TransformType::FlipHRotate90 => [
            0.0, 1.0, 0.0, 0.0, //
            1.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ],
        TransformType::FlipVRotate90 => [
            0.0, -1.0, 0.0, 0.0, //
            -1.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            1.0, 1.0, 0.0, 1.0,
        ],
    }
}

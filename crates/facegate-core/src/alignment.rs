//! Face alignment via 4-DOF similarity transform.
//!
//! Warps a face to a canonical 112×112 RGB crop using five reference
//! points (eye centres, nose tip, mouth corners) and a least-squares fit.

use image::RgbaImage;

/// Reference positions of the five alignment points in a 112×112 crop.
const REFERENCE_112: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

pub const ALIGNED_SIZE: usize = 112;

/// Least-squares similarity transform mapping `src` onto `dst`.
///
/// Returns `[a, -b, tx, b, a, ty]`:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
fn similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [f32; 6] {
    // Normal equations for the unknowns [a, b, tx, ty]:
    //   sx*a - sy*b + tx = dx
    //   sy*a + sx*b + ty = dy
    let mut ata = [[0.0f32; 4]; 4];
    let mut atb = [0.0f32; 4];

    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let rows = [([sx, -sy, 1.0, 0.0], dx), ([sy, sx, 0.0, 1.0], dy)];
        for (r, rhs) in rows {
            for j in 0..4 {
                for k in 0..4 {
                    ata[j][k] += r[j] * r[k];
                }
                atb[j] += r[j] * rhs;
            }
        }
    }

    let [a, b, tx, ty] = solve4(ata, atb);
    [a, -b, tx, b, a, ty]
}

/// Gaussian elimination with partial pivoting. A singular system yields the
/// identity scale with no translation.
#[allow(clippy::needless_range_loop)]
fn solve4(mut m: [[f32; 4]; 4], mut v: [f32; 4]) -> [f32; 4] {
    for col in 0..4 {
        let pivot_row = (col..4)
            .max_by(|&i, &j| m[i][col].abs().total_cmp(&m[j][col].abs()))
            .unwrap_or(col);
        m.swap(col, pivot_row);
        v.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return [1.0, 0.0, 0.0, 0.0];
        }

        for row in col + 1..4 {
            let f = m[row][col] / pivot;
            for k in col..4 {
                m[row][k] -= f * m[col][k];
            }
            v[row] -= f * v[col];
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        let tail: f32 = (i + 1..4).map(|j| m[i][j] * x[j]).sum();
        x[i] = (v[i] - tail) / m[i][i];
    }
    x
}

/// Inverse-map every output pixel into `image` with bilinear sampling.
/// Samples outside the source are black.
fn warp_rgb(image: &RgbaImage, matrix: &[f32; 6], out_size: usize) -> Vec<u8> {
    let (a, tx, b, ty) = (matrix[0], matrix[2], matrix[3], matrix[5]);
    let det = a * a + b * b;
    let mut out = vec![0u8; out_size * out_size * 3];
    if det.abs() < 1e-12 {
        return out;
    }
    let ia = a / det;
    let ib = b / det;
    let (w, h) = (image.width() as i64, image.height() as i64);

    let sample = |x: i64, y: i64, c: usize| -> f32 {
        if x >= 0 && x < w && y >= 0 && y < h {
            image.get_pixel(x as u32, y as u32)[c] as f32
        } else {
            0.0
        }
    };

    for oy in 0..out_size {
        for ox in 0..out_size {
            let dx = ox as f32 - tx;
            let dy = oy as f32 - ty;
            let sx = ia * dx + ib * dy;
            let sy = -ib * dx + ia * dy;

            let x0 = sx.floor() as i64;
            let y0 = sy.floor() as i64;
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            for c in 0..3 {
                let val = sample(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
                    + sample(x0 + 1, y0, c) * fx * (1.0 - fy)
                    + sample(x0, y0 + 1, c) * (1.0 - fx) * fy
                    + sample(x0 + 1, y0 + 1, c) * fx * fy;
                out[(oy * out_size + ox) * 3 + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    out
}

/// Align a face to a packed 112×112 RGB crop (row-major, 3 bytes per pixel).
pub fn align_face(image: &RgbaImage, points: &[(f32, f32); 5]) -> Vec<u8> {
    let matrix = similarity_transform(points, &REFERENCE_112);
    warp_rgb(image, &matrix, ALIGNED_SIZE)
}

/// Capture frame (y-up, used by the manual box editor) to scan frame (z-up).
/// Row-major: [x_new, y_new, z_new]
pub const CAPTURE_TO_SCAN: [[f64; 3]; 3] = [
    [1.0, 0.0, 0.0],  // X = X
    [0.0, 0.0, -1.0], // Y = -Z
    [0.0, 1.0, 0.0],  // Z = Y
];

/// Map a capture-frame position into the scan frame.
pub fn capture_to_scan(x: f64, y: f64, z: f64) -> (f64, f64, f64) {
    let input = [x, y, z];
    let mut output = [0.0; 3];

    for i in 0..3 {
        for j in 0..3 {
            output[i] += CAPTURE_TO_SCAN[i][j] * input[j];
        }
    }

    (output[0], output[1], output[2])
}

/// Map capture-frame extents into the scan frame.
/// Extents are unsigned, so only the axis permutation applies.
pub fn capture_extent_to_scan(sx: f64, sy: f64, sz: f64) -> (f64, f64, f64) {
    let input = [sx, sy, sz];
    let mut output = [0.0; 3];

    for i in 0..3 {
        for j in 0..3 {
            output[i] += CAPTURE_TO_SCAN[i][j].abs() * input[j];
        }
    }

    (output[0], output[1], output[2])
}

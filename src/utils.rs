/// Utility functions shared by the layers and the trainer.

/// Sigmoid activation function: σ(x) = 1 / (1 + e^(-x))
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Human-readable parameter count, e.g. `1.23M`.
pub fn readable_size(n: usize) -> String {
    let mut size = n as f64;
    let mut suffix = "";
    for (i, s) in ["K", "M", "G"].iter().enumerate() {
        let scaled = n as f64 / 1000f64.powi(i as i32 + 1);
        if scaled >= 1.0 {
            size = scaled;
            suffix = s;
        } else {
            break;
        }
    }
    format!("{:.2}{}", size, suffix)
}

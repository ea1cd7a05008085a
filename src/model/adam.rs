/// Adam optimizer (Kingma & Ba, 2015) over a fixed set of parameter buffers.
///
/// ```text
/// m_t = β1 · m_{t-1} + (1 - β1) · g
/// v_t = β2 · v_{t-1} + (1 - β2) · g²
/// p   = p - lr · m̂_t / (√v̂_t + ε)
/// ```
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    /// First moment estimates, one buffer per parameter group
    m: Vec<Vec<f32>>,
    /// Second moment estimates
    v: Vec<Vec<f32>>,
    /// Steps taken, for bias correction
    t: i32,
}

impl Adam {
    /// `sizes` lists the length of every parameter buffer, in the order they
    /// will be passed to [`Adam::step`].
    pub fn new(learning_rate: f32, sizes: &[usize]) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            m: sizes.iter().map(|&n| vec![0.0; n]).collect(),
            v: sizes.iter().map(|&n| vec![0.0; n]).collect(),
            t: 0,
        }
    }

    pub fn steps(&self) -> i32 {
        self.t
    }

    /// Apply one update to every parameter buffer.
    ///
    /// Panics if the buffers don't match the sizes given at construction.
    pub fn step(&mut self, params: &mut [&mut [f32]], grads: &[&[f32]]) {
        assert_eq!(params.len(), self.m.len(), "parameter group count changed");
        assert_eq!(grads.len(), self.m.len(), "gradient group count changed");

        self.t += 1;
        let bias1 = 1.0 - self.beta1.powi(self.t);
        let bias2 = 1.0 - self.beta2.powi(self.t);

        for (group, (param, grad)) in params.iter_mut().zip(grads).enumerate() {
            let m = &mut self.m[group];
            let v = &mut self.v[group];
            assert_eq!(param.len(), m.len(), "parameter group {group} resized");

            for i in 0..param.len() {
                let g = grad[i];
                m[i] = self.beta1 * m[i] + (1.0 - self.beta1) * g;
                v[i] = self.beta2 * v[i] + (1.0 - self.beta2) * g * g;
                let m_hat = m[i] / bias1;
                let v_hat = v[i] / bias2;
                param[i] -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
            }
        }
    }
}

use rv::misc::logsumexp;

/// Prevent the inner value from being verbosely / pretty printed during a debug.
pub(crate) struct NoPrettyPrint<T: std::fmt::Debug>(pub T);

impl<T: std::fmt::Debug> NoPrettyPrint<T> {
    pub fn new(t: T) -> Self {
        Self(t)
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for NoPrettyPrint<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Prevent "{:#?}" from being used.
        write!(f, "{:?}", self.0)
    }
}

/// `logsumexp` that tolerates every term being `-inf`.
pub(crate) fn ln_sum_exp(xs: &[f64]) -> f64 {
    if xs.iter().all(|&x| x == f64::NEG_INFINITY) {
        f64::NEG_INFINITY
    } else {
        logsumexp(xs)
    }
}

pub fn trapz(y: &[f64], x: &[f64]) -> f64 {
    x.iter()
        .zip(x.iter().skip(1))
        .zip(y.iter().zip(y.iter().skip(1)))
        .map(|((x0, x1), (y0, y1))| (y1 + y0) * (x1 - x0) / 2.0)
        .sum()
}

#[cfg(test)]
pub(crate) mod testing {
    use rv::misc::ks_test;
    use serde::Serialize;

    /// Assert that `samples` are consistent with `cdf` by a one-sample
    /// Kolmogorov-Smirnov test. On failure the samples are written to a
    /// persistent temp file whose path is reported in the panic.
    pub(crate) fn assert_ks_fit<F: Fn(f64) -> f64>(samples: &[f64], cdf: F, min_p_value: f64) {
        let (stat, p) = ks_test(samples, cdf);

        if p < min_p_value {
            #[derive(Serialize)]
            struct Samples<'a> {
                samples: &'a [f64],
            }

            let mut file =
                tempfile::NamedTempFile::new().expect("to be able to create a temp file");
            serde_json::to_writer(&mut file, &Samples { samples }).expect("to write to file");
            let (_, path) = file
                .keep()
                .expect("to be able to make a persistent temp file");
            let path = path.display();

            panic!(
                "KS p-value is lower than bound: {p:5.3} < {min_p_value:5.3} (ks stat = {stat}) (Debug file: {path})"
            );
        }
    }

    /// Total variation distance between two empirical distributions over
    /// small non-negative integers.
    pub(crate) fn count_tv_distance(xs: &[usize], ys: &[usize]) -> f64 {
        let len = xs.iter().chain(ys).max().map_or(0, |m| m + 1);
        let histogram = |vs: &[usize]| {
            let mut h = vec![0.0; len];
            vs.iter().for_each(|&v| h[v] += 1.0 / vs.len() as f64);
            h
        };
        let (hx, hy) = (histogram(xs), histogram(ys));
        0.5 * hx.iter().zip(hy).map(|(a, b)| (a - b).abs()).sum::<f64>()
    }
}

use crate::count::CounterResult;

/// A value derived from other events after counting.
pub trait Metric: Send + Sync {
    fn name(&self) -> &str;

    /// Events (or other metrics) this metric is calculated from.
    fn required_counter_names(&self) -> Vec<String>;

    /// `None` if a required value is missing or the metric is undefined for them.
    fn calculate(&self, result: &CounterResult) -> Option<f64>;
}

/// `numerator / denominator * factor`.
#[derive(Clone, Debug)]
pub struct RatioMetric {
    name: String,
    numerator: String,
    denominator: String,
    factor: f64,
}

impl RatioMetric {
    pub fn new(
        name: impl Into<String>,
        numerator: impl Into<String>,
        denominator: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            numerator: numerator.into(),
            denominator: denominator.into(),
            factor: 1.0,
        }
    }

    pub fn scaled(self, factor: f64) -> Self {
        Self { factor, ..self }
    }
}

impl Metric for RatioMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn required_counter_names(&self) -> Vec<String> {
        vec![self.numerator.clone(), self.denominator.clone()]
    }

    fn calculate(&self, result: &CounterResult) -> Option<f64> {
        let numerator = result.get(&self.numerator)?;
        let denominator = result.get(&self.denominator)?;
        (denominator != 0.0).then(|| numerator / denominator * self.factor)
    }
}

/// Share of references that did not miss.
#[derive(Clone, Debug)]
pub struct HitRatio {
    name: String,
    references: String,
    misses: String,
}

impl HitRatio {
    pub fn new(
        name: impl Into<String>,
        references: impl Into<String>,
        misses: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            references: references.into(),
            misses: misses.into(),
        }
    }
}

impl Metric for HitRatio {
    fn name(&self) -> &str {
        &self.name
    }

    fn required_counter_names(&self) -> Vec<String> {
        vec![self.references.clone(), self.misses.clone()]
    }

    fn calculate(&self, result: &CounterResult) -> Option<f64> {
        let references = result.get(&self.references)?;
        let misses = result.get(&self.misses)?;
        (references != 0.0).then(|| (references - misses) / references)
    }
}

pub(super) fn builtin() -> Vec<Box<dyn Metric>> {
    vec![
        Box::new(RatioMetric::new("instructions-per-cycle", "instructions", "cycles")),
        Box::new(RatioMetric::new("cycles-per-instruction", "cycles", "instructions")),
        Box::new(HitRatio::new("cache-hit-ratio", "cache-references", "cache-misses")),
        Box::new(RatioMetric::new("cache-miss-ratio", "cache-misses", "cache-references")),
        Box::new(RatioMetric::new("dTLB-miss-ratio", "dTLB-load-misses", "dTLB-loads")),
        Box::new(RatioMetric::new("iTLB-miss-ratio", "iTLB-load-misses", "iTLB-loads")),
        Box::new(RatioMetric::new(
            "L1-data-miss-ratio",
            "L1-dcache-load-misses",
            "L1-dcache-loads",
        )),
        Box::new(RatioMetric::new("branch-miss-ratio", "branch-misses", "branches")),
        Box::new(RatioMetric::new("gigahertz", "cycles", "seconds").scaled(1e-9)),
    ]
}

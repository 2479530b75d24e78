//! Closes the loop from observed invocations back into template ranking.

use tracing::debug;

use super::definition::TemplatePerformance;
use super::error::TemplateError;
use super::registry::TemplateRegistry;

/// One observed use of a template.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceSample {
    pub confidence: f64,
    pub processing_time_ms: u64,
    pub success: bool,
}

impl TemplatePerformance {
    /// Folds one sample into the running averages, weighting the existing
    /// values by `usage_count`, then counts the use.
    pub fn absorb(&mut self, sample: &PerformanceSample) {
        let n = self.usage_count as f64;
        let next = n + 1.0;
        let success = if sample.success { 1.0 } else { 0.0 };

        self.avg_confidence = (self.avg_confidence * n + sample.confidence) / next;
        self.avg_processing_time_ms =
            (self.avg_processing_time_ms * n + sample.processing_time_ms as f64) / next;
        self.success_rate = (self.success_rate * n + success) / next;
        self.usage_count += 1;
    }
}

impl TemplateRegistry {
    /// Applies a performance sample to a template. This is the only writer of
    /// template performance; the update happens under a single write lock.
    pub fn update_metrics(
        &self,
        template_id: &str,
        sample: PerformanceSample,
    ) -> Result<TemplatePerformance, TemplateError> {
        let mut templates = self.write();
        let template = templates
            .get_mut(template_id)
            .ok_or_else(|| TemplateError::NotFound(template_id.to_string()))?;
        template.performance.absorb(&sample);

        debug!(
            template_id,
            usage = template.performance.usage_count,
            avg_confidence = template.performance.avg_confidence,
            success_rate = template.performance.success_rate,
            "Template performance updated"
        );
        Ok(template.performance)
    }
}

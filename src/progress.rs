use crate::features::Modality;

/// Observer for reporting evaluation progress. Repetitions run on the
/// `rayon` pool, so callbacks arrive from several threads and out of order.
pub trait EvaluationProgress: Sync {
    fn on_start(&self, modality: Modality, repetitions: usize) {
        let _ = (modality, repetitions);
    }
    fn on_repetition_finished(&self, modality: Modality, repetition: usize) {
        let _ = (modality, repetition);
    }
    fn on_finish(&self, modality: Modality) {
        let _ = modality;
    }
}

#[derive(Default)]
pub struct NoopProgress;

impl EvaluationProgress for NoopProgress {}

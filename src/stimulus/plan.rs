use rand::Rng;

use super::{PoolSet, Stimulus, StimulusGenerator};
use crate::catalog::{TestDefinition, TestKind};
use crate::error::EngineError;

const RECALL_OPTIONS: usize = 4;
const AUDITORY_REPEAT_PROBABILITY: f64 = 0.5;
const STROOP_CONGRUENT_PROBABILITY: f64 = 0.35;

/// Adaptive sequence bounds
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AdaptiveSpan {
    pub max_length: usize,
}

/// Everything generated up front for one session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPlan {
    /// Memorize set shown together before the first trial; may be empty
    pub study: Vec<Stimulus>,
    /// One entry per trial, in presentation order
    pub trials: Vec<Stimulus>,
    pub adaptive: Option<AdaptiveSpan>,
}

impl<R: Rng> StimulusGenerator<R> {
    /// Generate the study set and trials for `definition`
    pub fn plan_session(
        &mut self,
        definition: &TestDefinition,
        pools: &PoolSet,
    ) -> Result<SessionPlan, EngineError> {
        let config = &definition.configuration;
        let pool = pools.for_kind(definition.kind);

        let plan = match definition.kind {
            TestKind::VisualMemory | TestKind::SymbolMemory | TestKind::VisualAttention => {
                let study = self.generate(pool, config.question_count)?;
                let probe_count = config.probe_count.unwrap_or(pool.len());
                let trials = self.build_distractor_set(pool, &study, probe_count)?;
                SessionPlan {
                    study,
                    trials,
                    adaptive: None,
                }
            }
            TestKind::VerbalMemory => {
                let study = self.generate(pool, config.question_count)?;
                let trials = study
                    .iter()
                    .map(|s| self.recall_probe(s, pool, &pools.letters, RECALL_OPTIONS))
                    .collect::<Result<Vec<_>, _>>()?;
                SessionPlan {
                    study,
                    trials,
                    adaptive: None,
                }
            }
            TestKind::AuditoryMemory => {
                let study = self.generate(pool, config.question_count)?;
                let trials = study
                    .iter()
                    .map(|s| self.recognition_probe(pool, s, AUDITORY_REPEAT_PROBABILITY))
                    .collect::<Result<Vec<_>, _>>()?;
                SessionPlan {
                    study,
                    trials,
                    adaptive: None,
                }
            }
            TestKind::DigitSpan => {
                let (start, max) = (config.start_length(), config.max_length());
                if max > pool.len() || start == 0 || start > max {
                    return Err(EngineError::StimulusPoolExhausted {
                        requested: max.max(start),
                        available: pool.len(),
                    });
                }
                SessionPlan {
                    study: Vec::new(),
                    trials: vec![self.digit_sequence(start)?],
                    adaptive: Some(AdaptiveSpan { max_length: max }),
                }
            }
            TestKind::Stroop => SessionPlan {
                study: Vec::new(),
                trials: self.colour_words(pool, config.question_count, STROOP_CONGRUENT_PROBABILITY)?,
                adaptive: None,
            },
            TestKind::Arithmetic => SessionPlan {
                study: Vec::new(),
                trials: self.operations(config.question_count)?,
                adaptive: None,
            },
        };

        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::stimulus::Payload;
    use assert_matches::assert_matches;

    fn plan_for(kind: TestKind, seed: u64) -> SessionPlan {
        let def = Catalog::builtin().by_kind(kind).unwrap().clone();
        let pools = PoolSet::builtin().unwrap();
        StimulusGenerator::seeded(seed)
            .plan_session(&def, &pools)
            .unwrap()
    }

    #[test]
    fn visual_memory_probes_whole_pool() {
        let plan = plan_for(TestKind::VisualMemory, 1);
        assert_eq!(plan.study.len(), 10);
        assert_eq!(plan.trials.len(), 19);
        assert_eq!(plan.trials.iter().filter(|t| t.target).count(), 10);
    }

    #[test]
    fn symbol_memory_and_attention_sizes() {
        let symbols = plan_for(TestKind::SymbolMemory, 1);
        assert_eq!((symbols.study.len(), symbols.trials.len()), (3, 12));

        let attention = plan_for(TestKind::VisualAttention, 1);
        assert_eq!((attention.study.len(), attention.trials.len()), (6, 20));
    }

    #[test]
    fn verbal_memory_single_choice_trial() {
        let plan = plan_for(TestKind::VerbalMemory, 3);
        assert_eq!(plan.study.len(), 1);
        assert_eq!(plan.trials.len(), 1);
        assert_matches!(&plan.trials[0].payload, Payload::Choice { options, .. } if options.len() == 4);
    }

    #[test]
    fn digit_span_starts_with_start_length() {
        let plan = plan_for(TestKind::DigitSpan, 3);
        assert!(plan.study.is_empty());
        assert_eq!(plan.trials.len(), 1);
        assert_eq!(plan.trials[0].digits().map(|d| d.len()), Some(3));
        assert_eq!(plan.adaptive, Some(AdaptiveSpan { max_length: 9 }));
    }

    #[test]
    fn digit_span_rejects_lengths_beyond_digits() {
        let mut def = Catalog::builtin().by_kind(TestKind::DigitSpan).unwrap().clone();
        def.configuration.max_length = Some(11);
        let pools = PoolSet::builtin().unwrap();
        assert_matches!(
            StimulusGenerator::seeded(1).plan_session(&def, &pools),
            Err(EngineError::StimulusPoolExhausted { .. })
        );
    }

    #[test]
    fn stroop_and_arithmetic_have_no_study_set() {
        let stroop = plan_for(TestKind::Stroop, 4);
        assert!(stroop.study.is_empty());
        assert_eq!(stroop.trials.len(), 12);

        let arithmetic = plan_for(TestKind::Arithmetic, 4);
        assert!(arithmetic.study.is_empty());
        assert_eq!(arithmetic.trials.len(), 12);
    }

    #[test]
    fn plans_are_reproducible_for_every_kind() {
        for kind in TestKind::ALL {
            assert_eq!(plan_for(kind, 99), plan_for(kind, 99), "{kind}");
        }
    }

    #[test]
    fn probe_count_override_shrinks_recognition_set() {
        let mut def = Catalog::builtin().by_kind(TestKind::VisualMemory).unwrap().clone();
        def.configuration.probe_count = Some(10);
        let pools = PoolSet::builtin().unwrap();
        let plan = StimulusGenerator::seeded(5).plan_session(&def, &pools).unwrap();
        assert_eq!(plan.trials.len(), 10);
    }
}

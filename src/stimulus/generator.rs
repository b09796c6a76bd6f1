use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;

use super::{Operator, Payload, PoolEntry, Stimulus, StimulusPool};
use crate::error::EngineError;

const OPERAND_MIN: i32 = 1;
const OPERAND_MAX: i32 = 10;

/// Builds the ordered stimuli of one session from a pool and a random source
#[derive(Debug, Clone)]
pub struct StimulusGenerator<R = ChaCha8Rng> {
    rng: R,
    next_id: usize,
}

impl StimulusGenerator<ChaCha8Rng> {
    /// Same seed and pool always give the same stimuli
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(ChaCha8Rng::seed_from_u64(seed))
    }

    pub fn from_entropy() -> Self {
        Self::seeded(rand::thread_rng().gen())
    }
}

impl<R: Rng> StimulusGenerator<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { rng, next_id: 0 }
    }

    fn next_id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// `count` distinct indices below `available`, in random order
    fn pick(&mut self, available: usize, count: usize) -> Result<Vec<usize>, EngineError> {
        if count > available {
            return Err(EngineError::StimulusPoolExhausted {
                requested: count,
                available,
            });
        }
        let mut indices: Vec<usize> = (0..available).collect();
        let (chosen, _) = indices.partial_shuffle(&mut self.rng, count);
        Ok(chosen.to_vec())
    }

    /// Sample `count` pool items without replacement
    pub fn generate(
        &mut self,
        pool: &StimulusPool,
        count: usize,
    ) -> Result<Vec<Stimulus>, EngineError> {
        let picked = self.pick(pool.len(), count)?;
        Ok(picked
            .into_iter()
            .map(|i| {
                let id = self.next_id();
                Stimulus::item(id, pool.items[i].value.clone(), true)
            })
            .collect())
    }

    /// Recognition probes of `pool_size` items: studied targets mixed with foils
    /// drawn from the rest of the pool, shuffled.
    ///
    /// Targets keep their share of the pool; when `pool_size` equals the pool
    /// size every target is probed.
    pub fn build_distractor_set(
        &mut self,
        pool: &StimulusPool,
        targets: &[Stimulus],
        pool_size: usize,
    ) -> Result<Vec<Stimulus>, EngineError> {
        if pool.is_empty() || pool_size > pool.len() {
            return Err(EngineError::StimulusPoolExhausted {
                requested: pool_size,
                available: pool.len(),
            });
        }

        let studied: HashSet<&str> = targets.iter().filter_map(|s| s.item_value()).collect();
        let foils: Vec<&PoolEntry> = pool
            .items
            .iter()
            .filter(|e| !studied.contains(e.value.as_str()))
            .collect();

        let share = (pool_size * targets.len() + pool.len() / 2) / pool.len();
        let mut target_count = share.min(targets.len()).min(pool_size);
        let foil_count = (pool_size - target_count).min(foils.len());
        target_count = pool_size - foil_count;
        if target_count > targets.len() {
            return Err(EngineError::StimulusPoolExhausted {
                requested: pool_size,
                available: targets.len() + foils.len(),
            });
        }

        let mut probes: Vec<(String, bool)> = Vec::with_capacity(pool_size);
        for i in self.pick(targets.len(), target_count)? {
            if let Some(value) = targets[i].item_value() {
                probes.push((value.to_string(), true));
            }
        }
        for i in self.pick(foils.len(), foil_count)? {
            probes.push((foils[i].value.clone(), false));
        }
        probes.shuffle(&mut self.rng);

        Ok(probes
            .into_iter()
            .map(|(value, target)| {
                let id = self.next_id();
                Stimulus::item(id, value, target)
            })
            .collect())
    }

    /// A sequence of `length` distinct digits
    pub fn digit_sequence(&mut self, length: usize) -> Result<Stimulus, EngineError> {
        let digits = self
            .pick(10, length)?
            .into_iter()
            .map(|d| d as u8)
            .collect();
        Ok(Stimulus {
            id: self.next_id(),
            payload: Payload::Digits { digits },
            target: true,
        })
    }

    /// Grow a digit sequence by one digit not already in it
    pub fn extend(&mut self, current: &Stimulus) -> Result<Stimulus, EngineError> {
        let digits = current.digits().ok_or(EngineError::StimulusPoolExhausted {
            requested: 1,
            available: 0,
        })?;
        let unused: Vec<u8> = (0..10u8).filter(|d| !digits.contains(d)).collect();
        let next = unused
            .choose(&mut self.rng)
            .copied()
            .ok_or(EngineError::StimulusPoolExhausted {
                requested: digits.len() + 1,
                available: 10,
            })?;

        let mut extended = digits.to_vec();
        extended.push(next);
        Ok(Stimulus {
            id: self.next_id(),
            payload: Payload::Digits { digits: extended },
            target: true,
        })
    }

    /// Multiple choice probe asking for the label of a studied item
    pub fn recall_probe(
        &mut self,
        studied: &Stimulus,
        pool: &StimulusPool,
        letters: &StimulusPool,
        options: usize,
    ) -> Result<Stimulus, EngineError> {
        let item = studied.item_value().unwrap_or_default().to_string();
        let expected = pool
            .label_of(&item)
            .or_else(|| item.chars().next().map(String::from))
            .unwrap_or_default();

        let others: Vec<&PoolEntry> = letters
            .items
            .iter()
            .filter(|e| e.value != expected)
            .collect();
        let foil_count = options.saturating_sub(1);
        let mut choices: Vec<String> = self
            .pick(others.len(), foil_count)?
            .into_iter()
            .map(|i| others[i].value.clone())
            .collect();
        choices.push(expected.clone());
        choices.shuffle(&mut self.rng);

        Ok(Stimulus {
            id: self.next_id(),
            payload: Payload::Choice {
                item,
                options: choices,
                expected,
            },
            target: true,
        })
    }

    /// Probe that repeats the studied item with `target_probability`, otherwise
    /// shows a different pool item
    pub fn recognition_probe(
        &mut self,
        pool: &StimulusPool,
        studied: &Stimulus,
        target_probability: f64,
    ) -> Result<Stimulus, EngineError> {
        let value = studied.item_value().unwrap_or_default();
        let others: Vec<&PoolEntry> = pool.items.iter().filter(|e| e.value != value).collect();

        let same = others.is_empty() || self.rng.gen_bool(target_probability);
        let shown = if same {
            value.to_string()
        } else {
            let i = self.pick(others.len(), 1)?[0];
            others[i].value.clone()
        };

        let id = self.next_id();
        Ok(Stimulus::item(id, shown, same))
    }

    /// Colour words whose ink keeps the word's own colour with `congruent_probability`,
    /// otherwise takes the colour at the same position of a shuffled colour list
    pub fn colour_words(
        &mut self,
        pool: &StimulusPool,
        count: usize,
        congruent_probability: f64,
    ) -> Result<Vec<Stimulus>, EngineError> {
        let words = self.pick(pool.len(), count)?;
        let mut inks: Vec<usize> = (0..pool.len()).collect();
        inks.shuffle(&mut self.rng);

        let mut stimuli = Vec::with_capacity(count);
        for (position, word) in words.into_iter().enumerate() {
            let ink = if self.rng.gen_bool(congruent_probability) {
                word
            } else {
                inks[position % inks.len()]
            };
            let word_entry = &pool.items[word];
            let ink_entry = &pool.items[ink];
            stimuli.push(Stimulus {
                id: self.next_id(),
                payload: Payload::ColourWord {
                    word: word_entry.value.clone(),
                    ink: ink_entry.value.clone(),
                    hex: ink_entry.label.clone().unwrap_or_default(),
                },
                target: word_entry.value == ink_entry.value,
            });
        }
        Ok(stimuli)
    }

    /// Distinct operations over `{*, /, +, -}` with operands in 1..=10
    pub fn operations(&mut self, count: usize) -> Result<Vec<Stimulus>, EngineError> {
        let span = (OPERAND_MAX - OPERAND_MIN + 1) as usize;
        let space = Operator::ALL.len() * span * span;

        let picked = self.pick(space, count)?;
        Ok(picked
            .into_iter()
            .map(|i| {
                let op = Operator::ALL[i / (span * span)];
                let lhs = OPERAND_MIN + ((i / span) % span) as i32;
                let rhs = OPERAND_MIN + (i % span) as i32;
                Stimulus {
                    id: self.next_id(),
                    payload: Payload::Operation { op, lhs, rhs },
                    target: true,
                }
            })
            .collect())
    }
}

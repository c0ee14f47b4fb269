use super::{sort_by_timestamp, Sample, Sampler, Trigger, Values};
use crate::config::{Config, Cpu, Process, SampleConfig};
use crate::registry::CounterDefinition;
use crate::Result;

macro_rules! multi_sampler {
    ($ty:ident) => {
        impl<'d> $ty<'d> {
            /// Adds the trigger to every target, see [`Sampler::trigger`].
            pub fn trigger(&mut self, trigger: impl Into<Trigger>) -> Result<()> {
                self.trigger_group([trigger])
            }

            /// Adds the trigger group to every target, see [`Sampler::trigger_group`].
            pub fn trigger_group<I, T>(&mut self, triggers: I) -> Result<()>
            where
                I: IntoIterator<Item = T>,
                T: Into<Trigger>,
            {
                let triggers: Vec<Trigger> = triggers.into_iter().map(Into::into).collect();
                for sampler in &mut self.samplers {
                    sampler.trigger_group(triggers.iter().cloned())?;
                }
                Ok(())
            }

            /// Sets the values of every target.
            pub fn set_values(&mut self, values: &Values) {
                for sampler in &mut self.samplers {
                    *sampler.values_mut() = values.clone();
                }
            }

            pub fn samplers(&self) -> &[Sampler<'d>] {
                &self.samplers
            }

            pub fn close(&mut self) {
                for sampler in &mut self.samplers {
                    sampler.close();
                }
            }

            /// Samples of every target, in target order unless sorted.
            pub fn result(&mut self, sort_by_time: bool) -> Vec<Sample> {
                let mut samples: Vec<Sample> = self
                    .samplers
                    .iter_mut()
                    .flat_map(|it| it.result(false))
                    .collect();
                if sort_by_time {
                    sort_by_timestamp(&mut samples);
                }
                samples
            }
        }
    };
}

/// One [`Sampler`] per thread, each started and stopped by its own thread.
pub struct MultiThreadSampler<'d> {
    samplers: Vec<Sampler<'d>>,
}

impl<'d> MultiThreadSampler<'d> {
    pub fn new(registry: &'d CounterDefinition, num_threads: usize) -> Self {
        Self::with_config(registry, SampleConfig::default(), num_threads)
    }

    pub fn with_config(registry: &'d CounterDefinition, config: SampleConfig, num_threads: usize) -> Self {
        let config = SampleConfig {
            config: Config {
                process: Process::Calling,
                ..config.config
            },
            ..config
        };
        let samplers = (0..num_threads)
            .map(|_| Sampler::with_config(registry, config.clone()))
            .collect();
        Self { samplers }
    }

    pub fn sampler_mut(&mut self, thread: usize) -> Option<&mut Sampler<'d>> {
        self.samplers.get_mut(thread)
    }

    /// Samplers to be moved into their threads.
    pub fn samplers_mut(&mut self) -> &mut [Sampler<'d>] {
        &mut self.samplers
    }
}

multi_sampler!(MultiThreadSampler);

/// One [`Sampler`] per CPU core, sampling every process on it.
pub struct MultiCoreSampler<'d> {
    samplers: Vec<Sampler<'d>>,
}

impl<'d> MultiCoreSampler<'d> {
    pub fn new(registry: &'d CounterDefinition, cores: &[u16]) -> Self {
        Self::with_config(registry, SampleConfig::default(), cores)
    }

    pub fn with_config(registry: &'d CounterDefinition, config: SampleConfig, cores: &[u16]) -> Self {
        let samplers = cores
            .iter()
            .map(|core| {
                let config = SampleConfig {
                    config: Config {
                        process: Process::Any,
                        cpu: Cpu::Core(*core),
                        ..config.config.clone()
                    },
                    ..config.clone()
                };
                Sampler::with_config(registry, config)
            })
            .collect();
        Self { samplers }
    }

    /// Starts every core, stopping those already started if one fails.
    pub fn start(&mut self) -> Result<()> {
        for i in 0..self.samplers.len() {
            if let Err(e) = self.samplers[i].start() {
                for sampler in &mut self.samplers[..i] {
                    let _ = sampler.stop();
                }
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        for sampler in &mut self.samplers {
            sampler.stop()?;
        }
        Ok(())
    }
}

multi_sampler!(MultiCoreSampler);

//! Knobs for the analysis driver.

/// Which of the built-in specializers run after each analysis pass.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SpecializerKinds {
    pub call_site: bool,
    pub usage: bool,
    pub targeted: bool,
    pub phpdoc: bool,
}

impl SpecializerKinds {
    pub fn none() -> SpecializerKinds {
        SpecializerKinds {
            call_site: false,
            usage: false,
            targeted: false,
            phpdoc: false,
        }
    }
    pub fn all() -> SpecializerKinds {
        SpecializerKinds {
            call_site: true,
            usage: true,
            targeted: true,
            phpdoc: true,
        }
    }
}

impl Default for SpecializerKinds {
    fn default() -> SpecializerKinds {
        // Usage-based specialization proposes types nothing has observed yet; it is opt-in.
        SpecializerKinds {
            usage: false,
            ..SpecializerKinds::all()
        }
    }
}

#[derive(Clone, Debug)]
pub struct AnalysisConfig {
    /// Outer fixpoint iterations (analyze, bind, specialize, forward) before giving up.
    pub max_iterations: usize,
    pub parallel: bool,
    pub num_workers: usize,
    /// Allow specialized clones to be specialized again.
    pub incremental_specialization: bool,
    pub max_specializations_per_routine: usize,
    pub specializers: SpecializerKinds,
    /// Past this many plausible classes for a parameter, usage-based specialization falls back
    /// to a generic object.
    pub max_class_candidates: usize,
}

impl Default for AnalysisConfig {
    fn default() -> AnalysisConfig {
        AnalysisConfig {
            max_iterations: 32,
            parallel: true,
            num_workers: num_cpus::get(),
            incremental_specialization: false,
            max_specializations_per_routine: 1,
            specializers: Default::default(),
            max_class_candidates: 4,
        }
    }
}

impl AnalysisConfig {
    /// Single-threaded; useful for debugging.
    pub fn sequential() -> AnalysisConfig {
        AnalysisConfig {
            parallel: false,
            num_workers: 1,
            ..Default::default()
        }
    }
    pub fn with_max_iterations(mut self, n: usize) -> AnalysisConfig {
        self.max_iterations = n;
        self
    }
    pub fn with_parallel(mut self, parallel: bool) -> AnalysisConfig {
        self.parallel = parallel;
        self
    }
    pub fn with_num_workers(mut self, n: usize) -> AnalysisConfig {
        self.num_workers = n;
        self
    }
    pub fn with_incremental_specialization(mut self, on: bool) -> AnalysisConfig {
        self.incremental_specialization = on;
        self
    }
    pub fn with_max_specializations_per_routine(mut self, n: usize) -> AnalysisConfig {
        self.max_specializations_per_routine = n;
        self
    }
    pub fn with_specializers(mut self, kinds: SpecializerKinds) -> AnalysisConfig {
        self.specializers = kinds;
        self
    }
    pub fn with_max_class_candidates(mut self, n: usize) -> AnalysisConfig {
        self.max_class_candidates = n;
        self
    }

    /// Worker threads to actually spawn.
    pub(crate) fn workers(&self) -> usize {
        if self.parallel {
            self.num_workers.max(1)
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = AnalysisConfig::default();
        assert_eq!(c.max_iterations, 32);
        assert!(c.parallel);
        assert!(!c.incremental_specialization);
        assert_eq!(c.max_specializations_per_routine, 1);
        assert!(c.specializers.call_site && c.specializers.targeted && c.specializers.phpdoc);
        assert!(!c.specializers.usage);
        assert_eq!(AnalysisConfig::sequential().workers(), 1);
        assert_eq!(AnalysisConfig::default().with_num_workers(0).workers(), 1);
    }
}

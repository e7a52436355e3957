mod data;
// Modules are private; the public surface is re-exported below
mod cache;
mod config;
mod covariance;
mod deck;
mod error;
mod nuclide;
mod pipeline;
mod reaction;
mod reconstruct;
mod sampling;
mod spectral;
mod uncertainty;

pub use cache::{BasisCache, CacheEntry};
pub use config::{default_cache_dir, Config, PerturbationBounds};
pub use covariance::{
    direct_layout, AssembledCovariance, ChannelLayout, ChannelSpan, CovarianceAssembler,
    Extraction, RepairReport, VarianceRepair,
};
pub use data::{reaction_label, DISAPPEARANCE_MTS, INELASTIC_CONSTITUENT_MTS, REACTION_NAME};
pub use deck::{
    register_libraries, rename_nuclide, set_cross_sections_path, DeckWriter, LibraryEntry,
    INPUT_FILES, LIBRARY_FILE,
};
pub use error::{PipelineStage, Result, UqError};
pub use nuclide::{find_nuclide_file, Nuclide};
pub use pipeline::{BatchReport, Diagnostics, Engine, PreparedNuclide, SampleReport};
pub use reaction::ReactionCurve;
pub use reconstruct::{default_sum_rules, CurveReconstructor, PerturbedNuclide, SumRule};
pub use sampling::{read_sample_file, split_samples, PerturbationField, SampleMapper};
pub use spectral::{retained_rank, SpectralBasis, SpectralReducer};
pub use uncertainty::{
    Baseline, CovarianceBlock, DirectCovariance, JsonDirectorySource, MemorySource,
    NuclideUncertainty, UncertaintySource,
};

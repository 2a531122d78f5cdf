pub mod batch;
pub mod doctor;
pub mod entropy;
pub mod error;
pub mod model;
pub mod probe;
pub mod rbd;
pub mod reader;
pub mod reference;
pub mod report;
pub mod resolver;
pub mod signature;
pub mod stripe;

pub use batch::{
    load_reference_file, parse_reference_list, run_batch, validate_batch, BatchEvent,
    BatchOptions,
};
pub use doctor::{collect_doctor_info, DoctorInfo};
pub use entropy::{classify_sample, EntropyClass, EntropyReading};
pub use error::{AttachError, InputError, ReadError, ReleaseWarning, ResolutionError};
pub use model::{
    parse_sample_count, parse_stripe_size, BatchReport, BatchTotals, Classification,
    DeviceEvidence, ProbeResult, StripeGeometry, Verdict, DEFAULT_SAMPLE_COUNT, MAX_SAMPLE_COUNT,
    DEFAULT_STRIPE_SIZE_BYTES, REPORT_VERSION,
};
pub use probe::{probe_offset, ProbeOptions};
pub use rbd::{MappedImage, RbdCli};
pub use reader::{BlockReader, DeviceOpener, FileBlockReader, FileDeviceOpener, MemoryBlockReader};
pub use reference::{DeviceReference, RemoteImage};
pub use report::{
    format_probe_line, load_report, render_text_summary, write_report, ReportArtifacts,
    ReportOptions,
};
pub use resolver::{AttachmentLayer, HandleGuard, ManagedHandle, Resolver, ResolverOptions};
pub use signature::{match_signature, SignatureMatch, NTFS_BOOT_PREFIX};
pub use stripe::{scan_device, scan_reader};

// Misc utilities useful to both benchlog and cloudreport.

mod configs;
mod dates;

// A structure representing the configuration of one cloud provider / group, and of one machine
// type within it.

pub use configs::CloudDetails;
pub use configs::MachineConfig;

// Read cloud configurations from one file, or from several files in order.

pub use configs::read_all_cloud_details;
pub use configs::read_cloud_details;

// Decode an already-parsed JSON value as a list of cloud configurations.

pub use configs::parse_cloud_details;

// Types and utilities for manipulating timestamps.

pub use dates::Timestamp;

// "A long long time ago".

pub use dates::epoch;

// Conversions into Timestamp.

pub use dates::modtime;
pub use dates::timestamp_from_systemtime;
pub use dates::timestamp_from_unix;

// Render a Timestamp the way the reports want it.

pub use dates::format_timestamp;

// Today, as a report version directory name.

pub use dates::default_report_version;

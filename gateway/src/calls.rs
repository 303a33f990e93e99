//! API call and parameter names.

pub const GET_MEETING_INFO: &str = "getMeetingInfo";
pub const IS_MEETING_RUNNING: &str = "isMeetingRunning";
pub const GET_MEETINGS: &str = "getMeetings";
pub const CREATE: &str = "create";
pub const END: &str = "end";
pub const JOIN: &str = "join";
pub const GET_RECORDINGS: &str = "getRecordings";
pub const PUBLISH_RECORDINGS: &str = "publishRecordings";
pub const UPDATE_RECORDINGS: &str = "updateRecordings";

pub const MEETING_ID: &str = "meetingID";
pub const RECORD_ID: &str = "recordID";
pub const DURATION: &str = "duration";
pub const PUBLISH: &str = "publish";
pub const STATE: &str = "state";

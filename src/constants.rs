//! Column names and default locations shared across the pipeline.

// Output schema, in write order
pub const USER_ID: &str = "user_id";
pub const ACCOUNT_SIGNUP_TIME: &str = "account_signup_time";
pub const PRO_SUBSCRIPTION_SIGNUP_TIME: &str = "pro_subscription_signup_time";
pub const FIRST_RECORDING_ID: &str = "first_recording_id";
pub const FIRST_RECORDING_TIME: &str = "first_recording_time";
pub const FIRST_RECORDING_ACTIVITY_TYPE: &str = "first_recording_activity_type";
pub const FIRST_RECORDING_CALORIES: &str = "first_recording_calories";
pub const FIRST_RECORDING_DURATION: &str = "first_recording_duration";
pub const FIRST_RECORDING_TOTAL_TIME_SECONDS: &str = "first_recording_total_time_seconds";
pub const FIRST_RECORDING_UPDATED_TIME: &str = "first_recording_updated_time";
pub const FIRST_RECORDING_MOVING_TIME_SECONDS: &str = "first_recording_moving_time_seconds";
pub const FIRST_RECORDING_AVG_PACE: &str = "first_recording_avg_pace";
pub const FIRST_RECORDING_AVG_SPEED: &str = "first_recording_avg_speed";
pub const FIRST_RECORDING_ELEVATION_GAIN: &str = "first_recording_elevation_gain";
pub const FIRST_RECORDING_ELEVATION_LOSS: &str = "first_recording_elevation_loss";
pub const INVALID_FIRST_RECORDING_DATE_FLAG: &str = "invalid_first_recording_date_flag";
pub const FIRST_RECORDING_DURATION_IN_HOURS: &str = "first_recording_duration_in_hours";

pub const OUTPUT_COLUMNS: [&str; 17] = [
    USER_ID,
    ACCOUNT_SIGNUP_TIME,
    PRO_SUBSCRIPTION_SIGNUP_TIME,
    FIRST_RECORDING_ID,
    FIRST_RECORDING_TIME,
    FIRST_RECORDING_ACTIVITY_TYPE,
    FIRST_RECORDING_CALORIES,
    FIRST_RECORDING_DURATION,
    FIRST_RECORDING_TOTAL_TIME_SECONDS,
    FIRST_RECORDING_UPDATED_TIME,
    FIRST_RECORDING_MOVING_TIME_SECONDS,
    FIRST_RECORDING_AVG_PACE,
    FIRST_RECORDING_AVG_SPEED,
    FIRST_RECORDING_ELEVATION_GAIN,
    FIRST_RECORDING_ELEVATION_LOSS,
    INVALID_FIRST_RECORDING_DATE_FLAG,
    FIRST_RECORDING_DURATION_IN_HOURS,
];

// Raw export column names
pub const RAW_USER_ID: &str = "Pseudo_User_ID";
pub const RAW_SIGNUP_DATE: &str = "signup_date";
pub const RAW_PRO_START_DATE: &str = "start_date";
pub const RAW_RECORDING_ID: &str = "Recording_ID";
pub const RAW_RECORDING_TIME: &str = "Date_Time";
pub const RAW_ACTIVITY_TYPE: &str = "Activity_Type";
pub const RAW_UPDATED_TIME: &str = "updated_time";
pub const RAW_PAYLOAD: &str = "Recording_Summary";

// Payload keys
pub const PAYLOAD_CALORIES: &str = "calories";
pub const PAYLOAD_DURATION: &str = "duration";
pub const PAYLOAD_TOTAL_TIME: &str = "timeTotal";
pub const PAYLOAD_MOVING_TIME: &str = "timeMoving";
pub const PAYLOAD_TOTAL_DISTANCE: &str = "distanceTotal";
pub const PAYLOAD_ELEVATION_GAIN: &str = "elevationGain";
pub const PAYLOAD_ELEVATION_LOSS: &str = "elevationLoss";
pub const PAYLOAD_UPDATED_AT: &str = "updatedAt";

// Default locations
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const DEFAULT_USERS_PATH: &str = "source_data/users_2017.tsv";
pub const DEFAULT_RECORDINGS_PATH: &str = "source_data/recordings_2017.tsv";
pub const DEFAULT_OUTPUT_PATH: &str = "output_data/UsersDataset.csv";
pub const DEFAULT_RULES_PATH: &str = "outlier_rules.toml";

pub const CONFIG_PATH_ENV: &str = "USERS_DATASET_CONFIG";

/// Format used for every timestamp written to the output table. Fractional
/// seconds are written only when present.
pub const OUTPUT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Whether `name` is one of the output columns
pub fn is_output_column(name: &str) -> bool {
    OUTPUT_COLUMNS.contains(&name)
}

/// Longest free-text field (status, description) accepted on an appointment.
pub const MAX_TEXT_LEN: usize = 1024;

pub const MAX_VACCINE_NAME_LEN: usize = 128;

/// A single visit may not occupy more than a day.
pub const MAX_APPOINTMENT_MINUTES: u32 = 24 * 60;

/// Ten years of declared availability in one window.
pub const MAX_WINDOW_DAYS: i64 = 3_660;

pub const MAX_WINDOWS_PER_DOCTOR: usize = 4_096;

/// Widest date range a listing query may ask for.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 5 * 366;

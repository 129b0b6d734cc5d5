//! Log event type

use bytes::Bytes;

use crate::frame::Frame;

/// One recorded message
///
/// `eventnum` is assigned by [`LogFile::write_event`](super::LogFile::write_event);
/// whatever value the caller sets is ignored on write. The data buffer is
/// always an owned copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    /// Position of the event in its file, starting at 0
    pub eventnum: i64,
    /// Timestamp in microseconds
    pub timestamp: i64,
    /// Channel the message was seen on
    pub channel: String,
    data: Bytes,
}

impl LogEvent {
    pub fn new(timestamp: i64, channel: impl Into<String>, data: &[u8]) -> Self {
        Self {
            eventnum: 0,
            timestamp,
            channel: channel.into(),
            data: Bytes::copy_from_slice(data),
        }
    }

    /// Event for a frame, stamped with the frame's receive time
    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            eventnum: 0,
            timestamp: frame.receive_time(),
            channel: frame.channel().to_string(),
            data: frame.payload().clone(),
        }
    }

    pub(crate) fn from_parts(eventnum: i64, timestamp: i64, channel: String, data: Bytes) -> Self {
        Self {
            eventnum,
            timestamp,
            channel,
            data,
        }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Replace the data with a copy of `data`
    pub fn set_data(&mut self, data: &[u8]) {
        self.data = Bytes::copy_from_slice(data);
    }

    /// Frame carrying this event's channel and data, timed at `timestamp`
    pub fn to_frame(&self) -> Frame {
        Frame::from_owned(self.channel.clone(), self.data.clone(), self.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_data_copies() {
        let mut buf = vec![1u8, 2, 3];
        let mut event = LogEvent::new(10, "A", &buf);
        buf[0] = 9;
        assert_eq!(&event.data()[..], &[1, 2, 3]);

        let mut replacement = vec![7u8, 8];
        event.set_data(&replacement);
        replacement[0] = 0;
        assert_eq!(&event.data()[..], &[7, 8]);
    }

    #[test]
    fn test_frame_conversion() {
        let frame = Frame::with_time("POSE", b"xyz", 1234);
        let event = LogEvent::from_frame(&frame);
        assert_eq!(event.timestamp, 1234);
        assert_eq!(event.channel, "POSE");
        assert_eq!(event.to_frame(), frame);
    }
}

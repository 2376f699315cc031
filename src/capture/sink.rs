use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use image::RgbImage;

use crate::classify::EquipmentState;
use crate::detect::Detection;

/// Everything the display needs for one processed frame, delivered together
/// so the image and the status line never disagree.
#[derive(Clone, Debug)]
pub struct FrameUpdate {
    pub frame_index: u64,
    pub annotated: RgbImage,
    pub equipment: EquipmentState,
    pub detections: Vec<Detection>,
}

/// Receives frame updates from the capture worker.
///
/// Called on the worker thread. Implementations must not block for long;
/// the frame budget includes the time spent here.
pub trait DisplaySink: Send + Sync {
    fn present(&self, update: FrameUpdate);
}

/// Sink that discards updates. For headless capture.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl DisplaySink for NullSink {
    fn present(&self, _update: FrameUpdate) {}
}

/// Hands updates to whichever thread owns the paired receiver.
///
/// When the receiver falls behind, new updates are dropped rather than
/// stalling capture.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: Sender<FrameUpdate>,
}

impl DisplaySink for ChannelSink {
    fn present(&self, update: FrameUpdate) {
        match self.tx.try_send(update) {
            Ok(()) => {}
            Err(TrySendError::Full(update)) => {
                log::debug!("ChannelSink: display behind, dropped frame {}", update.frame_index);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Bounded display channel. `capacity` of 0 is treated as 1.
pub fn display_channel(capacity: usize) -> (ChannelSink, Receiver<FrameUpdate>) {
    let (tx, rx) = bounded(capacity.max(1));
    (ChannelSink { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(frame_index: u64) -> FrameUpdate {
        FrameUpdate {
            frame_index,
            annotated: RgbImage::new(2, 2),
            equipment: EquipmentState::new(true, false),
            detections: Vec::new(),
        }
    }

    #[test]
    fn full_channel_drops_newest() {
        let (sink, rx) = display_channel(1);
        sink.present(update(1));
        sink.present(update(2));
        assert_eq!(rx.try_recv().unwrap().frame_index, 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_receiver_is_ignored() {
        let (sink, rx) = display_channel(2);
        drop(rx);
        sink.present(update(1));
    }
}

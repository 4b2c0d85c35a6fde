use anyhow::{bail, Result};
use image::GrayImage;

use super::backend::MarkerStrategy;
use super::result::Detection;

/// Ordered list of strategies with a count-based fallback.
///
/// Strategies run in registration order. The first result with at least `expected_min`
/// markers wins; when every strategy falls short, the last strategy's result is used.
pub struct StrategyChain {
    strategies: Vec<Box<dyn MarkerStrategy>>,
    expected_min: usize,
}

impl StrategyChain {
    pub fn new(expected_min: usize) -> Self {
        Self {
            strategies: Vec::new(),
            expected_min,
        }
    }

    pub fn register<S: MarkerStrategy + 'static>(&mut self, strategy: S) {
        self.strategies.push(Box::new(strategy));
    }

    pub fn with<S: MarkerStrategy + 'static>(mut self, strategy: S) -> Self {
        self.register(strategy);
        self
    }

    pub fn expected_min(&self) -> usize {
        self.expected_min
    }

    /// Strategy names in run order.
    pub fn list(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn detect(&self, gray: &GrayImage, threshold: u8) -> Result<Detection> {
        let Some((last, primary)) = self.strategies.split_last() else {
            bail!("no marker strategy registered");
        };
        for strategy in primary {
            let detection = strategy.detect(gray, threshold)?;
            if detection.len() >= self.expected_min {
                return Ok(detection);
            }
            log::debug!(
                "{} strategy found {} of {} expected markers; falling back",
                strategy.name(),
                detection.len(),
                self.expected_min
            );
        }
        last.detect(gray, threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::DetectedMarker;

    struct Fixed {
        name: &'static str,
        count: usize,
    }

    impl MarkerStrategy for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        fn detect(&self, gray: &GrayImage, _threshold: u8) -> Result<Detection> {
            let mut detection = Detection::empty(gray.width(), gray.height());
            detection.markers = vec![DetectedMarker::new(1.0, 1.0, 2.0); self.count];
            Ok(detection)
        }
    }

    #[test]
    fn primary_wins_when_it_meets_the_minimum() {
        let chain = StrategyChain::new(6)
            .with(Fixed { name: "a", count: 6 })
            .with(Fixed { name: "b", count: 9 });
        assert_eq!(chain.list(), vec!["a", "b"]);
        assert_eq!(chain.detect(&GrayImage::new(4, 4), 200).unwrap().len(), 6);
    }

    #[test]
    fn falls_back_to_secondary_even_when_it_finds_fewer() {
        let chain = StrategyChain::new(6)
            .with(Fixed { name: "a", count: 5 })
            .with(Fixed { name: "b", count: 2 });
        assert_eq!(chain.detect(&GrayImage::new(4, 4), 200).unwrap().len(), 2);
    }

    #[test]
    fn empty_chain_is_an_error() {
        assert!(StrategyChain::new(1).detect(&GrayImage::new(4, 4), 200).is_err());
    }
}

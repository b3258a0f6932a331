use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A CART regression tree grown by minimizing the squared error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct RegressionTree {
    nodes: Vec<Node>,
}

struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct Grower<'a> {
    x: &'a [Vec<f64>],
    y: &'a [f64],
    max_depth: usize,
    nodes: Vec<Node>,
    importance: Vec<f64>,
}

impl RegressionTree {
    /// Fits a tree on the rows named by `sample`, which may repeat rows.
    ///
    /// Returns the tree with the impurity reduction credited to each
    /// feature.
    pub fn fit(
        x: &[Vec<f64>],
        y: &[f64],
        sample: &[usize],
        max_depth: usize,
    ) -> (Self, Vec<f64>) {
        let n_features = x.first().map_or(0, Vec::len);
        let mut grower = Grower {
            x,
            y,
            max_depth,
            nodes: vec![],
            importance: vec![0.0; n_features],
        };

        let mut sample = sample.to_vec();
        grower.grow(&mut sample, 0);

        let tree = Self {
            nodes: grower.nodes,
        };
        (tree, grower.importance)
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut at = 0;
        loop {
            match self.nodes.get(at) {
                Some(&Node::Leaf { value }) => return value,
                Some(&Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let v = row.get(feature).copied().unwrap_or(0.0);
                    at = if v <= threshold { left } else { right };
                }
                None => return 0.0,
            }
        }
    }
}

impl Grower<'_> {
    fn grow(&mut self, sample: &mut [usize], depth: usize) -> usize {
        let id = self.nodes.len();
        let value = self.mean(sample);
        self.nodes.push(Node::Leaf { value });

        if depth >= self.max_depth || sample.len() < 2 {
            return id;
        }
        let Some(split) = self.best_split(sample) else {
            return id;
        };

        self.importance[split.feature] += split.gain;

        let x = self.x;
        let at = partition(sample, |&i| x[i][split.feature] <= split.threshold);
        let (l, r) = sample.split_at_mut(at);

        let left = self.grow(l, depth + 1);
        let right = self.grow(r, depth + 1);

        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }

    fn mean(&self, sample: &[usize]) -> f64 {
        if sample.is_empty() {
            return 0.0;
        }
        sample.iter().map(|&i| self.y[i]).sum::<f64>() / sample.len() as f64
    }

    fn best_split(&self, sample: &[usize]) -> Option<Split> {
        let n = sample.len() as f64;
        let (sum, sum_sq) = sample.iter().fold((0.0, 0.0), |(s, sq), &i| {
            let y = self.y[i];
            (s + y, sq + y * y)
        });
        let parent = sum_sq - sum * sum / n;
        if parent <= f64::EPSILON * sum_sq.max(1.0) {
            return None;
        }

        let n_features = self.x.first().map_or(0, Vec::len);
        let mut order = sample.to_vec();
        let mut best: Option<Split> = None;

        for feature in 0..n_features {
            order.sort_by(|&a, &b| self.x[a][feature].total_cmp(&self.x[b][feature]));

            let (mut left_sum, mut left_sq) = (0.0, 0.0);
            for k in 1..order.len() {
                let y = self.y[order[k - 1]];
                left_sum += y;
                left_sq += y * y;

                let here = self.x[order[k - 1]][feature];
                let next = self.x[order[k]][feature];
                if here == next {
                    continue;
                }

                let nl = k as f64;
                let nr = n - nl;
                let right_sum = sum - left_sum;
                let right_sq = sum_sq - left_sq;
                let children =
                    (left_sq - left_sum * left_sum / nl) + (right_sq - right_sum * right_sum / nr);
                let gain = parent - children;

                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(Split {
                        feature,
                        threshold: here + (next - here) / 2.0,
                        gain,
                    });
                }
            }
        }

        best
    }
}

/// Moves every element matching `pred` to the front, returning how many did.
fn partition<T>(items: &mut [T], pred: impl Fn(&T) -> bool) -> usize {
    let mut at = 0;
    for i in 0..items.len() {
        if pred(&items[i]) {
            items.swap(at, i);
            at += 1;
        }
    }
    at
}

#[cfg(test)]
mod test {
    use super::*;

    fn step_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        let x = (0..10).map(|i| vec![f64::from(i), 0.0]).collect();
        let y = (0..10).map(|i| if i < 5 { 1.0 } else { 3.0 }).collect();
        (x, y)
    }

    #[test]
    fn learns_a_step() {
        let (x, y) = step_data();
        let all: Vec<_> = (0..10).collect();
        let (tree, importance) = RegressionTree::fit(&x, &y, &all, 3);

        assert_eq!(tree.predict(&[2.0, 0.0]), 1.0);
        assert_eq!(tree.predict(&[7.0, 0.0]), 3.0);
        assert_eq!(tree.predict(&[4.5, 0.0]), 1.0);

        // The whole reduction of 10.0 belongs to the first feature
        assert_eq!(importance, [10.0, 0.0]);
    }

    #[test]
    fn depth_zero_is_the_mean() {
        let (x, y) = step_data();
        let all: Vec<_> = (0..10).collect();
        let (tree, importance) = RegressionTree::fit(&x, &y, &all, 0);

        assert_eq!(tree.predict(&[0.0, 0.0]), 2.0);
        assert_eq!(importance, [0.0, 0.0]);
    }

    #[test]
    fn constant_targets_do_not_split() {
        let x = vec![vec![1.0], vec![2.0], vec![3.0]];
        let y = vec![4.0; 3];
        let (tree, _) = RegressionTree::fit(&x, &y, &[0, 1, 2], 5);

        assert_eq!(tree.nodes.len(), 1);
        assert_eq!(tree.predict(&[10.0]), 4.0);
    }

    #[test]
    fn repeated_samples_weigh_more() {
        let x = vec![vec![0.0], vec![1.0]];
        let y = vec![0.0, 6.0];
        let (tree, _) = RegressionTree::fit(&x, &y, &[0, 1, 1], 0);

        assert_eq!(tree.predict(&[0.0]), 4.0);
    }

    #[test]
    fn partition_keeps_matches_in_front() {
        let mut v = [5, 1, 4, 2, 3];
        let at = partition(&mut v, |&x| x <= 2);

        assert_eq!(at, 2);
        let mut front = v[..at].to_vec();
        front.sort();
        assert_eq!(front, [1, 2]);
    }
}

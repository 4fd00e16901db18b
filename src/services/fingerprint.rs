// 进度指纹引擎
//
// 对「哪些题目已完成」计算与顺序无关的签名，用于廉价判断本地与云端
// 进度是否一致。标识符形如 "{topicId}-{number}"，对排序后的集合做
// 两条独立的滚动哈希（乘数 31 / 37），最后与完成数异或。
// 哈希对只作快速否定；集合相等才是最终判据。

use std::collections::BTreeSet;

use crate::models::TopicProgress;

const HASH_MULTIPLIER_A: u64 = 31;
const HASH_MULTIPLIER_B: u64 = 37;

/// 一份进度快照的完成指纹
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    hash_a: u64,
    hash_b: u64,
    completed: BTreeSet<String>,
}

impl Fingerprint {
    /// 遍历 主题 → 章节 → 小节 → 题目，收集所有已完成题目的标识符。
    /// 缺失的嵌套层级视为空集合，不会报错。
    pub fn compute(progress: &[TopicProgress]) -> Self {
        let mut completed = BTreeSet::new();

        for topic in progress {
            for chapter in &topic.chapters {
                for subsection in &chapter.subsections {
                    for problem in &subsection.problems {
                        if problem.completed {
                            completed.insert(format!("{}-{}", topic.topic_id, problem.number));
                        }
                    }
                }
            }
        }

        let count = completed.len() as u64;
        let mut hash_a: u64 = 0;
        let mut hash_b: u64 = 0;

        // BTreeSet 迭代有序，因此哈希与输入数组顺序无关
        for id in &completed {
            for byte in id.bytes() {
                hash_a = hash_a
                    .wrapping_mul(HASH_MULTIPLIER_A)
                    .wrapping_add(byte as u64);
                hash_b = hash_b
                    .wrapping_mul(HASH_MULTIPLIER_B)
                    .wrapping_add(byte as u64);
            }
        }

        Self {
            hash_a: hash_a ^ count,
            hash_b: hash_b ^ count,
            completed,
        }
    }

    /// 已完成题目数量
    pub fn len(&self) -> usize {
        self.completed.len()
    }

    /// 零完成题目。空对空不代表「一致」：本地为空与云端为空
    /// 在同步决策中走不同分支。
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }

    /// 已完成题目标识符（有序），用于调试与冲突摘要
    pub fn completed_ids(&self) -> impl Iterator<Item = &str> {
        self.completed.iter().map(|s| s.as_str())
    }

    /// 两级一致性判断：哈希对 + 数量不同则必然不一致（快速否定）；
    /// 哈希一致时仍以集合比较为准，防止哈希碰撞误判。
    pub fn matches(&self, other: &Fingerprint) -> bool {
        if self.hash_a != other.hash_a
            || self.hash_b != other.hash_b
            || self.completed.len() != other.completed.len()
        {
            return false;
        }

        self.completed == other.completed
    }
}

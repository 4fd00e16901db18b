// 冲突解决器
// 本地与云端进度分歧时的三种解决策略：保留本地 / 保留云端 / 智能合并。
// 合并按位置对齐章节结构，完成标记取两边的并集，不丢失任何完成记录。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Chapter, Problem, Subsection, TopicProgress};

/// 解决策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolveStrategy {
    /// 保留本地：调用方需强制上传覆盖云端
    Local,
    /// 保留云端：写回本地存储，无需上传
    Cloud,
    /// 智能合并：任一边完成即算完成，合并结果需强制上传
    Merge,
}

/// 解决结果
#[derive(Debug, Clone)]
pub struct Resolution {
    pub progress: Vec<TopicProgress>,
    /// 为 true 时调用方必须强制上传（绕过乐观冲突检测）
    pub needs_upload: bool,
}

/// 应用解决策略
pub fn resolve(
    strategy: ResolveStrategy,
    local: Vec<TopicProgress>,
    cloud: Vec<TopicProgress>,
) -> Resolution {
    match strategy {
        ResolveStrategy::Local => Resolution {
            progress: local,
            needs_upload: true,
        },
        ResolveStrategy::Cloud => Resolution {
            progress: cloud,
            needs_upload: false,
        },
        ResolveStrategy::Merge => {
            let now = Utc::now();
            let merged = local
                .iter()
                .map(|local_topic| {
                    match cloud.iter().find(|c| c.topic_id == local_topic.topic_id) {
                        Some(cloud_topic) => merge_topic(local_topic, cloud_topic, now),
                        None => local_topic.clone(),
                    }
                })
                .collect();

            Resolution {
                progress: merged,
                needs_upload: true,
            }
        }
    }
}

/// 按位置合并单个主题
///
/// 结构字段（标题、链接、id）取本地侧；只在两边共有的位置上合并完成
/// 标记。本地多出的尾部结构原样保留；云端多出的尾部结构被丢弃，
/// 结构以本地为准。旧版扁平列表取本地侧。
fn merge_topic(
    local: &TopicProgress,
    cloud: &TopicProgress,
    now: DateTime<Utc>,
) -> TopicProgress {
    let chapters = local
        .chapters
        .iter()
        .enumerate()
        .map(|(chapter_idx, local_chapter)| {
            match cloud.chapters.get(chapter_idx) {
                Some(cloud_chapter) => merge_chapter(local_chapter, cloud_chapter, now),
                None => local_chapter.clone(),
            }
        })
        .collect();

    TopicProgress {
        topic_id: local.topic_id,
        chapters,
        problems: local.problems.clone(),
    }
}

fn merge_chapter(local: &Chapter, cloud: &Chapter, now: DateTime<Utc>) -> Chapter {
    let subsections = local
        .subsections
        .iter()
        .enumerate()
        .map(|(subsection_idx, local_subsection)| {
            match cloud.subsections.get(subsection_idx) {
                Some(cloud_subsection) => {
                    merge_subsection(local_subsection, cloud_subsection, now)
                }
                None => local_subsection.clone(),
            }
        })
        .collect();

    Chapter {
        id: local.id.clone(),
        title: local.title.clone(),
        subsections,
    }
}

fn merge_subsection(local: &Subsection, cloud: &Subsection, now: DateTime<Utc>) -> Subsection {
    let problems = local
        .problems
        .iter()
        .enumerate()
        .map(|(problem_idx, local_problem)| match cloud.problems.get(problem_idx) {
            Some(cloud_problem) => merge_problem(local_problem, cloud_problem, now),
            None => local_problem.clone(),
        })
        .collect();

    Subsection {
        id: local.id.clone(),
        title: local.title.clone(),
        problems,
    }
}

fn merge_problem(local: &Problem, cloud: &Problem, now: DateTime<Utc>) -> Problem {
    if local.completed || cloud.completed {
        Problem {
            completed: true,
            completed_at: local.completed_at.or(cloud.completed_at).or(Some(now)),
            ..local.clone()
        }
    } else {
        local.clone()
    }
}

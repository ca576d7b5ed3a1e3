//! 24-hour stories: per-author grouping for avatar rings and the viewer.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::backend::storage::normalize_story_url;
use crate::error::{too_large, ClientError, Result};
use crate::models::{LocalFile, MediaType, PublicProfile, Story};

pub const MAX_STORY_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ring {
    None,
    Unviewed,
    Viewed,
}

#[derive(Debug, Clone)]
pub struct StoryGroup {
    pub author: PublicProfile,
    /// Newest first.
    pub stories: Vec<Story>,
    pub all_viewed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct StoryFeed {
    groups: HashMap<Uuid, StoryGroup>,
    order: Vec<Uuid>,
    viewed: HashSet<Uuid>,
}

impl StoryFeed {
    /// `stories` must come newest first.
    pub fn build(stories: Vec<Story>, viewed: Vec<Uuid>, profiles: &[PublicProfile]) -> Self {
        let viewed: HashSet<Uuid> = viewed.into_iter().collect();
        let mut groups: HashMap<Uuid, StoryGroup> = HashMap::new();
        let mut order = Vec::new();
        for mut story in stories {
            story.media_url = normalize_story_url(&story.media_url);
            let group = groups.entry(story.user_id).or_insert_with(|| {
                order.push(story.user_id);
                StoryGroup {
                    author: profiles
                        .iter()
                        .find(|p| p.id == story.user_id)
                        .cloned()
                        .unwrap_or_else(|| PublicProfile::unknown(story.user_id)),
                    stories: Vec::new(),
                    all_viewed: true,
                }
            });
            if !viewed.contains(&story.id) {
                group.all_viewed = false;
            }
            group.stories.push(story);
        }
        // Stable sort keeps arrival order for ties.
        order.sort_by_key(|uid| {
            std::cmp::Reverse(groups.get(uid).and_then(|g| g.stories.first()).map(|s| s.created_at))
        });
        StoryFeed { groups, order, viewed }
    }

    pub fn group(&self, user: Uuid) -> Option<&StoryGroup> {
        self.groups.get(&user)
    }

    pub fn authors(&self) -> impl Iterator<Item = &StoryGroup> {
        self.order.iter().filter_map(move |uid| self.groups.get(uid))
    }

    pub fn ring(&self, user: Uuid) -> Ring {
        match self.groups.get(&user) {
            Some(g) if g.stories.is_empty() => Ring::None,
            Some(g) if g.all_viewed => Ring::Viewed,
            Some(_) => Ring::Unviewed,
            None => Ring::None,
        }
    }

    pub fn is_viewed(&self, story: Uuid) -> bool {
        self.viewed.contains(&story)
    }

    /// Local bookkeeping until the next reload.
    pub fn mark_viewed(&mut self, story: Uuid) {
        self.viewed.insert(story);
        for group in self.groups.values_mut() {
            if group.stories.iter().any(|s| s.id == story) {
                group.all_viewed = group.stories.iter().all(|s| self.viewed.contains(&s.id));
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoryViewer {
    pub user: Uuid,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Show(Story),
    Close,
}

impl StoryViewer {
    /// Opens at `start`, or at the first unviewed story, or at the newest.
    pub fn open(feed: &StoryFeed, user: Uuid, start: Option<usize>) -> Option<(Self, Story)> {
        let group = feed.group(user)?;
        let index = start
            .filter(|i| *i < group.stories.len())
            .or_else(|| group.stories.iter().position(|s| !feed.is_viewed(s.id)))
            .unwrap_or(0);
        let story = group.stories.get(index)?.clone();
        Some((StoryViewer { user, index }, story))
    }

    pub fn current<'a>(&self, feed: &'a StoryFeed) -> Option<&'a Story> {
        feed.group(self.user)?.stories.get(self.index)
    }

    /// Moves by `delta`; clamps at the first story and closes past the last.
    pub fn step(&mut self, feed: &StoryFeed, delta: isize) -> Step {
        let Some(group) = feed.group(self.user) else {
            return Step::Close;
        };
        let target = (self.index as isize + delta).max(0) as usize;
        match group.stories.get(target) {
            Some(story) => {
                self.index = target;
                Step::Show(story.clone())
            }
            None => Step::Close,
        }
    }
}

pub fn validate_story_file(file: &LocalFile) -> Result<MediaType> {
    let media = MediaType::from_mime(&file.mime)
        .ok_or_else(|| ClientError::validation("Choose an image or a video."))?;
    if file.size() > MAX_STORY_BYTES {
        return Err(too_large("Max 20 MB", file));
    }
    Ok(media)
}

pub fn normalize_caption(caption: &str) -> Option<String> {
    let caption = caption.trim();
    (!caption.is_empty()).then(|| caption.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn story(user: Uuid, minutes_ago: i64) -> Story {
        Story {
            id: Uuid::new_v4(),
            user_id: user,
            media_url: "https://x.supabase.co/storage/v1/object/stories/a.png".into(),
            media_type: MediaType::Image,
            caption: None,
            created_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    fn setup() -> (StoryFeed, Uuid, Uuid, Vec<Story>) {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let stories = vec![story(bob, 1), story(alice, 5), story(alice, 10), story(bob, 30)];
        let viewed = vec![stories[1].id];
        let profiles = vec![PublicProfile {
            username: Some("alice".into()),
            ..PublicProfile::unknown(alice)
        }];
        (StoryFeed::build(stories.clone(), viewed, &profiles), alice, bob, stories)
    }

    #[test]
    fn test_groups_by_author_newest_first() {
        let (feed, alice, bob, _) = setup();
        let order: Vec<Uuid> = feed.authors().map(|g| g.author.id).collect();
        assert_eq!(order, vec![bob, alice]);
        assert_eq!(feed.group(alice).unwrap().stories.len(), 2);
        assert_eq!(feed.group(bob).unwrap().author.display_name(), "User");
        assert!(feed.group(alice).unwrap().stories[0]
            .media_url
            .contains("/object/public/stories/"));
    }

    #[test]
    fn test_ring_state() {
        let (mut feed, alice, _, stories) = setup();
        assert_eq!(feed.ring(alice), Ring::Unviewed);
        feed.mark_viewed(stories[2].id);
        assert_eq!(feed.ring(alice), Ring::Viewed);
        assert_eq!(feed.ring(Uuid::new_v4()), Ring::None);
    }

    #[test]
    fn test_viewer_opens_at_first_unviewed() {
        let (feed, alice, _, stories) = setup();
        let (viewer, first) = StoryViewer::open(&feed, alice, None).unwrap();
        assert_eq!(viewer.index, 1);
        assert_eq!(first.id, stories[2].id);
        let (viewer, _) = StoryViewer::open(&feed, alice, Some(0)).unwrap();
        assert_eq!(viewer.index, 0);
        assert!(StoryViewer::open(&feed, Uuid::new_v4(), None).is_none());
    }

    #[test]
    fn test_viewer_clamps_and_closes() {
        let (feed, alice, _, _) = setup();
        let (mut viewer, _) = StoryViewer::open(&feed, alice, Some(0)).unwrap();
        assert!(matches!(viewer.step(&feed, -1), Step::Show(_)));
        assert_eq!(viewer.index, 0);
        assert!(matches!(viewer.step(&feed, 1), Step::Show(_)));
        assert_eq!(viewer.step(&feed, 1), Step::Close);
    }

    #[test]
    fn test_story_file_validation() {
        let file = LocalFile { name: "v.mp4".into(), mime: "video/mp4".into(), bytes: vec![1; 8] };
        assert_eq!(validate_story_file(&file).unwrap(), MediaType::Video);
        let pdf = LocalFile { mime: "application/pdf".into(), ..file.clone() };
        assert!(validate_story_file(&pdf).unwrap_err().is_validation());
        let big = LocalFile { bytes: vec![0; MAX_STORY_BYTES + 1], ..file };
        assert!(validate_story_file(&big).unwrap_err().to_string().starts_with("Max 20 MB, this file is "));
        assert_eq!(normalize_caption("  hi "), Some("hi".into()));
        assert_eq!(normalize_caption("   "), None);
    }
}

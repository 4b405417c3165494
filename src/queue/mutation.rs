use super::EmbeddingQueue;

fn file_ids(path: &str) -> [String; 2] {
    [format!("file:{path}"), format!("image:{path}")]
}

impl EmbeddingQueue {
    /// Remove every queue/failed-map entry addressing `path`, returning the
    /// number of entries removed. Idempotent: a second call with the same
    /// path returns 0.
    pub async fn remove_by_file_path(&self, path: &str) -> usize {
        self.remove_by_file_paths(std::slice::from_ref(&path.to_string())).await
    }

    pub async fn remove_by_file_paths(&self, paths: &[String]) -> usize {
        let ids: std::collections::HashSet<String> = paths
            .iter()
            .flat_map(|p| file_ids(p).into_iter())
            .collect();

        let removed_from_queue = {
            let mut queue = self.inner.queue.lock().await;
            let before = queue.len();
            // Reverse-iteration splice so the underlying allocation is never
            // replaced while a flush may hold a snapshot taken from the
            // front of this same queue.
            let mut i = queue.len();
            while i > 0 {
                i -= 1;
                if ids.contains(&queue[i].id) {
                    let _ = queue.remove(i);
                }
            }
            before - queue.len()
        };

        if removed_from_queue > 0 {
            if let Err(err) = self.persist_queue().await {
                crate::debug_eprintln!("failed to persist queue after removal: {err:#}");
            }
        }

        let removed_from_failed = self.inner.failed.remove_by_ids(&ids);
        removed_from_queue + removed_from_failed
    }

    /// Rewrite `id` and `meta.path`/`meta.name` in place for every queue and
    /// failed-map entry addressing `old_path`, pointing it at `new_path`.
    /// Returns the number of entries updated.
    pub async fn update_by_file_path(&self, old_path: &str, new_path: &str) -> usize {
        self.update_by_file_paths(&[(old_path.to_string(), new_path.to_string())]).await
    }

    pub async fn update_by_file_paths(&self, renames: &[(String, String)]) -> usize {
        let mut updated = 0;
        {
            let mut queue = self.inner.queue.lock().await;
            for (old_path, new_path) in renames {
                let old_file = format!("file:{old_path}");
                let old_image = format!("image:{old_path}");
                for item in queue.iter_mut() {
                    let new_id = if item.id == old_file {
                        Some(format!("file:{new_path}"))
                    } else if item.id == old_image {
                        Some(format!("image:{new_path}"))
                    } else {
                        None
                    };
                    if let Some(new_id) = new_id {
                        item.id = new_id;
                        item.set_meta_path(new_path);
                        if let Some(name) =
                            std::path::Path::new(new_path).file_name().and_then(|n| n.to_str())
                        {
                            item.set_meta_name(name);
                        }
                        updated += 1;
                    }
                }
            }
        }

        if updated > 0 {
            if let Err(err) = self.persist_queue().await {
                crate::debug_eprintln!("failed to persist queue after rename: {err:#}");
            }
        }

        for (old_path, new_path) in renames {
            updated += self.inner.failed.rename_path(old_path, new_path);
        }

        updated
    }
}

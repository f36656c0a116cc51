use tracksmith_core::{EntityModel, Identity, Model, Record};

/// Authors, their posts and comments on posts, plus generated-key tags.
///
/// - `Post.author_id` is a required reference to `Author`
/// - `Post.editor_id` is an optional reference to `Author`
/// - `Comment.post_id` is a required reference to `Post`
pub fn blog_model() -> Model {
    Model::new()
        .entity(EntityModel::new("Author", &["id"]))
        .entity(
            EntityModel::new("Post", &["id"])
                .references("author", &["author_id"], "Author")
                .optional_reference("editor", &["editor_id"], "Author"),
        )
        .entity(EntityModel::new("Comment", &["id"]).references("post", &["post_id"], "Post"))
        .entity(EntityModel::new("Tag", &["id"]).generated_key())
}

/// Two entities that require each other.
pub fn cyclic_model() -> Model {
    Model::new()
        .entity(EntityModel::new("Egg", &["id"]).references("chicken", &["chicken_id"], "Chicken"))
        .entity(EntityModel::new("Chicken", &["id"]).references("egg", &["egg_id"], "Egg"))
}

pub fn author(id: i64, name: &str) -> Record {
    Record::new("Author").with("id", id).with("name", name)
}

pub fn post(id: i64, author_id: i64, title: &str) -> Record {
    Record::new("Post")
        .with("id", id)
        .with("author_id", author_id)
        .with("title", title)
}

pub fn comment(id: i64, post_id: i64, body: &str) -> Record {
    Record::new("Comment")
        .with("id", id)
        .with("post_id", post_id)
        .with("body", body)
}

pub fn author_id(id: i64) -> Identity {
    Identity::of("Author", id)
}

pub fn post_id(id: i64) -> Identity {
    Identity::of("Post", id)
}

pub fn comment_id(id: i64) -> Identity {
    Identity::of("Comment", id)
}

use crate::types::GroupPatch;

use super::{init_accounts, split_names};

pub fn run_group_add(
    data_dir: String,
    name: String,
    members: String,
    info: String,
) -> anyhow::Result<()> {
    let accounts = init_accounts(&data_dir)?;
    let (group, outcome) = accounts.add_group(&name, &split_names(&members), &info)?;

    println!("Created group \"{}\" (gid {})", group.group_name, group.gid);
    for note in outcome.notes {
        println!("  {note}");
    }
    Ok(())
}

pub fn run_group_remove(data_dir: String, name: String) -> anyhow::Result<()> {
    let accounts = init_accounts(&data_dir)?;
    let group = accounts.delete_group(name.as_str())?;
    println!("Removed group \"{}\" (gid {})", group.group_name, group.gid);
    Ok(())
}

pub fn run_group_members(data_dir: String, name: String, set: Option<String>) -> anyhow::Result<()> {
    let accounts = init_accounts(&data_dir)?;

    if let Some(list) = set {
        let outcome = accounts.modify_group(
            name.as_str(),
            GroupPatch {
                members: Some(split_names(&list)),
                ..GroupPatch::default()
            },
        )?;
        for note in outcome.notes {
            println!("  {note}");
        }
    }

    let Some(group) = accounts.lookup_group(name.as_str())? else {
        anyhow::bail!("No such group: {name}");
    };
    if group.members.is_empty() {
        println!("Group \"{}\" has no members", group.group_name);
    } else {
        for member in &group.members {
            println!("{member}");
        }
    }
    Ok(())
}
